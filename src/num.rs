/// Format a segment index as the fixed width, zero padded file stem used by
/// segment files: `0000000000000001`.
pub(crate) fn format_segment_index(n: u64) -> String {
    format!("{:016}", n)
}

/// Format number in Rust style with at least 9 digits: `001_200_000`.
pub(crate) fn format_pad9_u64(n: u64) -> String {
    // separate each 3 digit with a '_'
    let x = format!("{:09}", n);
    let len = x.len();
    x.chars().enumerate().fold(String::new(), |mut acc, (i, c)| {
        if i > 0 && (len - i) % 3 == 0 {
            acc.push('_');
        }
        acc.push(c);
        acc
    })
}
