//! Content-Stream Mini-Parser (C4).
//!
//! Deliberately line-oriented, ported from the original heuristic rather
//! than from a general token-based parser: split on `\n/N Do\n`, walk back
//! to the last `\nQ\n`, the segment's last ` cm`-suffixed line is the
//! matrix, everything before `\nW n` in that segment is the clip path.
//! Inputs that don't match the "one operator per line" shape typical PDF
//! writers produce fall through to "no clip" — the safe default (see
//! SPEC_FULL §4.3, §9).

/// 6-number affine matrix `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 }
    }
}

/// A single clip-path operator with page-unit operands, y-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipCommand {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    /// `c`: cubic Bezier with two explicit control points and an endpoint.
    CurveTo(f64, f64, f64, f64, f64, f64),
    /// `v`: cubic Bezier using the current point as the first control point.
    VCurveTo(f64, f64, f64, f64),
    /// `y`: cubic Bezier using the final point as the last control point.
    YCurveTo(f64, f64, f64, f64),
    Rect(f64, f64, f64, f64),
    Close,
}

/// What the mini-parser recovered for one `/Name Do` placement.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    /// `None` when no ` cm` line was found directly before the `Do`.
    pub matrix: Option<Matrix>,
    /// Empty means "no clip" — treated by the rasteriser as a solid white
    /// mask covering the whole image.
    pub clip: Vec<ClipCommand>,
}

/// Recover the placement matrix and clip path that apply to the `Do` of
/// XObject `name` inside `content`.
pub fn recover_placement(content: &[u8], name: &str) -> Placement {
    let Some(segment) = placement_segment(content, name) else {
        return Placement::default();
    };
    Placement { matrix: recover_matrix(segment), clip: recover_clip(segment) }
}

/// The bytes between the last `\nQ\n` before `\n/{name} Do\n` and the `Do`
/// invocation itself — the operators that apply only to this placement.
fn placement_segment<'a>(content: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let needle = format!("\n/{name} Do\n");
    let do_idx = find(content, needle.as_bytes())?;
    let prefix = &content[..do_idx];
    let seg_start = rfind(prefix, b"\nQ\n").map(|i| i + 3).unwrap_or(0);
    Some(&prefix[seg_start..])
}

/// The last non-empty line of `segment`, if it ends in ` cm`, parsed as a
/// 6-number matrix. Absent ⇒ caller falls back to [`Matrix::identity`].
fn recover_matrix(segment: &[u8]) -> Option<Matrix> {
    let last_line = segment
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .next_back()?;
    let line = std::str::from_utf8(last_line).ok()?.trim();
    let line = line.strip_suffix(" cm")?;
    let nums = parse_numbers(line);
    if nums.len() != 6 {
        return None;
    }
    Some(Matrix { a: nums[0], b: nums[1], c: nums[2], d: nums[3], e: nums[4], f: nums[5] })
}

/// Everything before `\nW n` in `segment`, parsed into path commands.
/// Absent `W n` ⇒ empty (no clip).
fn recover_clip(segment: &[u8]) -> Vec<ClipCommand> {
    let Some(idx) = find(segment, b"\nW n") else {
        return Vec::new();
    };
    let path_bytes = &segment[..idx];
    let mut commands = Vec::new();
    for line in path_bytes.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let Ok(text) = std::str::from_utf8(line) else { continue };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let mut tokens: Vec<&str> = text.split_whitespace().collect();
        let Some(op) = tokens.pop() else { continue };
        let nums = parse_numbers(&tokens.join(" "));
        match (op, nums.as_slice()) {
            ("m", [x, y]) => commands.push(ClipCommand::MoveTo(*x, *y)),
            ("l", [x, y]) => commands.push(ClipCommand::LineTo(*x, *y)),
            ("c", [x1, y1, x2, y2, x3, y3]) => {
                commands.push(ClipCommand::CurveTo(*x1, *y1, *x2, *y2, *x3, *y3))
            }
            ("v", [x2, y2, x3, y3]) => commands.push(ClipCommand::VCurveTo(*x2, *y2, *x3, *y3)),
            ("y", [x1, y1, x3, y3]) => commands.push(ClipCommand::YCurveTo(*x1, *y1, *x3, *y3)),
            ("re", [x, y, w, h]) => commands.push(ClipCommand::Rect(*x, *y, *w, *h)),
            ("h", []) => commands.push(ClipCommand::Close),
            // shape mismatch for this line: something's wrong, skip it and
            // keep going rather than aborting the whole clip recovery.
            _ => {}
        }
    }
    commands
}

fn parse_numbers(s: &str) -> Vec<f64> {
    s.split_whitespace().filter_map(|t| t.parse::<f64>().ok()).collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Convert a recovered matrix (or its identity fallback) to something the
/// compositor can use directly, erroring out only on a structurally
/// unexpected call site (never on a missing-`cm` content stream, which is
/// an expected, silently-handled case per §4.3).
pub fn matrix_or_identity(placement: &Placement) -> Matrix {
    placement.matrix.unwrap_or_else(Matrix::identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_matrix_and_rect_clip() {
        let content = b"q\n1 0 0 1 0 0 cm\n0 0 100 100 re\nW n\n/Im1 Do\nQ\n";
        let p = recover_placement(content, "Im1");
        assert_eq!(p.matrix, Some(Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 }));
        assert_eq!(p.clip, vec![ClipCommand::Rect(0.0, 0.0, 100.0, 100.0)]);
    }

    #[test]
    fn missing_w_n_means_no_clip() {
        let content = b"q\n1 0 0 1 0 0 cm\n/Im1 Do\nQ\n";
        let p = recover_placement(content, "Im1");
        assert!(p.clip.is_empty());
        assert!(p.matrix.is_some());
    }

    #[test]
    fn missing_cm_falls_back_to_identity_via_helper() {
        let content = b"q\n0 0 100 100 re\nW n\n/Im1 Do\nQ\n";
        let p = recover_placement(content, "Im1");
        assert!(p.matrix.is_none());
        assert_eq!(matrix_or_identity(&p), Matrix::identity());
    }

    #[test]
    fn respects_last_q_boundary_not_first() {
        let content =
            b"q\n2 0 0 2 0 0 cm\nQ\nq\n1 0 0 1 5 5 cm\n0 0 10 10 re\nW n\n/Im1 Do\nQ\n";
        let p = recover_placement(content, "Im1");
        assert_eq!(p.matrix.unwrap().e, 5.0);
    }

    #[test]
    fn curve_operators_parse_with_correct_arity() {
        let content =
            b"q\n1 0 0 1 0 0 cm\n0 0 m\n1 1 2 2 3 3 c\n4 4 5 5 v\n6 6 7 7 y\nh\nW n\n/Im1 Do\nQ\n";
        let p = recover_placement(content, "Im1");
        assert_eq!(
            p.clip,
            vec![
                ClipCommand::MoveTo(0.0, 0.0),
                ClipCommand::CurveTo(1.0, 1.0, 2.0, 2.0, 3.0, 3.0),
                ClipCommand::VCurveTo(4.0, 4.0, 5.0, 5.0),
                ClipCommand::YCurveTo(6.0, 6.0, 7.0, 7.0),
                ClipCommand::Close,
            ]
        );
    }

    #[test]
    fn unknown_name_yields_empty_placement() {
        let content = b"q\n1 0 0 1 0 0 cm\n/Im1 Do\nQ\n";
        let p = recover_placement(content, "Im2");
        assert!(p.matrix.is_none());
        assert!(p.clip.is_empty());
    }
}
