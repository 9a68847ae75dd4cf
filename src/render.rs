//! Compact text renderings for ids, counts, durations and sizes.

/// Render a set of ids as compact ranges.
///
/// Runs of three or more consecutive ids collapse to `first-last`, shorter
/// runs stay as single values: `[0,1,2,3,5,6,7,8,10,13,15,16,17]` renders as
/// `0-3,5-8,10,13,15-17` and `[5,6]` as `5,6`. Input order is irrelevant and
/// duplicates are ignored.
pub fn render_seq(ids: &[i32]) -> String {
    let mut seq = ids.to_vec();
    seq.sort_unstable();
    seq.dedup();

    let mut iter = seq.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let mut tokens = Vec::new();
    let (mut start, mut prev) = (first, first);
    for id in iter {
        if prev.checked_add(1) != Some(id) {
            push_run(&mut tokens, start, prev);
            start = id;
        }
        prev = id;
    }
    push_run(&mut tokens, start, prev);

    tokens.join(",")
}

fn push_run(tokens: &mut Vec<String>, start: i32, end: i32) {
    match i64::from(end) - i64::from(start) {
        0 => tokens.push(start.to_string()),
        1 => {
            tokens.push(start.to_string());
            tokens.push(end.to_string());
        }
        _ => tokens.push(format!("{start}-{end}")),
    }
}

/// Scale `count` through a unit ladder. `div[i]` is the factor between
/// `units[i]` and `units[i + 1]`.
fn scale<'a>(count: f64, div: &[f64], units: &[&'a str]) -> (f64, &'a str) {
    let mut c = count;
    let mut i = 0;
    while i + 1 < units.len() && i < div.len() && c.abs() >= div[i] {
        c /= div[i];
        i += 1;
    }
    (c, units.get(i).copied().unwrap_or(""))
}

/// Fixed-width rendering used for tracker output, e.g. `   1.500 s`.
pub fn human_count(count: f64, div: &[f64], units: &[&str]) -> String {
    let (value, unit) = scale(count, div, units);
    format!("{value:>8.3} {unit}")
}

pub fn human_time(ms: f64) -> String {
    human_count(ms, &[1000.0, 60.0, 60.0, 24.0], &["ms", "s", "m", "h", "d"])
}

pub fn human_memory(bytes: f64) -> String {
    human_count(
        bytes,
        &[1024.0, 1024.0, 1024.0, 1024.0, 1024.0],
        &["b", "Kb", "Mb", "Gb", "Tb"],
    )
}

/// Compact count for reports: `999`, `12.3K`, `4.0M`.
pub fn human_number(n: i64) -> String {
    if n.abs() < 1000 {
        return n.to_string();
    }
    let (value, unit) = scale(
        n as f64,
        &[1000.0, 1000.0, 1000.0, 1000.0],
        &["", "K", "M", "G", "T"],
    );
    format!("{value:.1}{unit}")
}
