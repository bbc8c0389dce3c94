//! Parser for the line-oriented OPM patch text format.
//!
//! ```text
//! // comment
//! @:0 Brass
//! LFO: 0 0 0 0 0
//! CH: 64 6 0 0 0 120 0
//! M1: 31 10 0 6 2 30 0 1 3 0 0
//! C1: 31 10 0 6 2 0 0 1 3 0 0
//! M2: 31 10 0 6 2 30 0 1 7 0 0
//! C2: 31 10 0 6 2 0 0 1 7 0 0
//! @:1 no Name
//! ```
//!
//! Parsing is deliberately forgiving: numbers are read with `strtoul`-like semantics and nothing short of the
//! end of input stops a block.

use crate::voice::{MAX_PATCHES, OPERATOR_PARAMS, PatchBank, Voice};

/// Lines starting with this are ignored.
const COMMENT: &str = "//";
/// Starts a voice block; followed by the block index.
const BLOCK: &str = "@:";
/// Follows the block index on the line that ends the valid voices.
const TERMINATOR: &str = "no Name";
/// Label of each of the six lines following a block marker.
const LINE_PREFIXES: [&str; 6] = ["LFO:", "CH:", "M1:", "C1:", "M2:", "C2:"];

/// A sequential source of text lines, such as an open patch file.
pub trait LineSource {
    /// Returns the next line without its terminator, or `None` once the source is exhausted.
    fn next_line(&mut self) -> Option<&str>;
}

impl LineSource for core::str::Lines<'_> {
    fn next_line(&mut self) -> Option<&str> {
        self.next()
    }
}

/// Parses voices from `source` into `bank`, replacing whatever it held. Returns the number of valid voices.
///
/// The count is the index of the first `@:<n> no Name` line if one appears, otherwise the number of complete
/// blocks read before the input ran out or the bank filled up. Zero marks the file invalid; that is reported,
/// not treated as an error.
pub fn parse<L: LineSource>(source: &mut L, bank: &mut PatchBank) -> u8 {
    bank.clear();

    let mut count: usize = 0;
    let mut terminated = false;
    while count < MAX_PATCHES {
        let Some(line) = source.next_line() else {
            break;
        };
        if line.starts_with(COMMENT) {
            continue;
        }
        let Some(rest) = block_marker(line, count) else {
            continue;
        };
        if rest.trim_start().starts_with(TERMINATOR) {
            terminated = true;
            break;
        }
        let Some(voice) = read_block(source) else {
            warn!("Patch block {} cut short by end of file", count);
            break;
        };
        if let Some(slot) = bank.slot_mut(count) {
            *slot = voice;
        }
        count += 1;
    }

    bank.set_valid_count(count as u8);
    if count == 0 {
        warn!("No voices found");
    } else if terminated {
        info!("Done reading voice data: {} voices before terminator", count);
    } else {
        info!("Done reading voice data: {} voices", count);
    }
    count as u8
}

/// If `line` is the marker for block `expected`, returns whatever follows the index.
fn block_marker(line: &str, expected: usize) -> Option<&str> {
    let rest = line.strip_prefix(BLOCK)?;
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let (index, rest) = rest.split_at(digits);
    match index.parse::<usize>() {
        Ok(index) if index == expected => Some(rest),
        _ => None,
    }
}

/// Reads the six lines of a voice block. Returns `None` if the source runs out first.
fn read_block<L: LineSource>(source: &mut L) -> Option<Voice> {
    let mut voice = Voice::default();
    for (i, prefix) in LINE_PREFIXES.iter().enumerate() {
        let line = source.next_line()?;
        let fields = line.trim_start();
        let fields = fields.strip_prefix(prefix).unwrap_or(fields);
        let mut numbers = Numbers::new(fields);
        let target: &mut [u8] = match i {
            0 => &mut voice.lfo,
            1 => &mut voice.channel,
            op => &mut voice.operators[op - 2],
        };
        debug_assert!(target.len() <= OPERATOR_PARAMS);
        for value in target.iter_mut() {
            *value = numbers.next_value();
        }
    }
    Some(voice)
}

/// Reads unsigned integers the way C's `strtoul` does when chained through its end pointer.
///
/// Leading whitespace and an optional `+` are skipped, digits are consumed up to the first non-digit, and a field
/// with no digits reads as zero without advancing (so every field after it reads as zero too). Values are
/// truncated to `u8`.
struct Numbers<'a> {
    rest: &'a str,
}

impl<'a> Numbers<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn next_value(&mut self) -> u8 {
        let trimmed = self.rest.trim_start();
        let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
        let digits = unsigned.len() - unsigned.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return 0;
        }
        let value = unsigned[..digits]
            .bytes()
            .fold(0_u32, |acc, b| acc.wrapping_mul(10).wrapping_add(u32::from(b - b'0')));
        self.rest = &unsigned[digits..];
        value as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::operator;

    const BLOCK_0: &str = "@:0 Brass\nLFO: 0 0 0 0 0\nCH: 64 6 0 0 0 120 0\nM1: 31 10 0 6 2 30 0 1 3 0 0\nC1: 31 10 0 6 2 0 0 1 3 0 0\nM2: 31 10 0 6 2 30 0 1 7 0 0\nC2: 31 10 0 6 2 0 0 1 7 0 0\n";

    fn block(index: usize, tl: u8) -> std::string::String {
        std::format!(
            "@:{index} Voice\nLFO: 1 2 3 4 5\nCH: 64 6 0 0 0 120 0\nM1: 31 10 0 6 2 {tl} 0 1 3 0 0\nC1: 31 10 0 6 2 0 0 1 3 0 0\nM2: 31 10 0 6 2 30 0 1 7 0 0\nC2: 31 10 0 6 2 0 0 1 7 0 0\n"
        )
    }

    fn parse_str(text: &str) -> (u8, PatchBank) {
        let mut bank = PatchBank::new();
        let count = parse(&mut text.lines(), &mut bank);
        (count, bank)
    }

    #[test]
    fn single_block() {
        let (count, bank) = parse_str(BLOCK_0);
        assert_eq!(1, count, "Expected left but got right");
        let voice = bank.get(0).expect("voice 0 should be valid");
        assert_eq!([64, 6, 0, 0, 0, 120, 0], voice.channel, "Expected left but got right");
        assert_eq!(30, voice.operators[0][operator::TL], "Expected left but got right");
        assert_eq!(7, voice.operators[3][operator::DT1], "Expected left but got right");
    }

    #[test]
    fn terminator_sets_count() {
        let mut text = std::string::String::from("// header comment\n");
        for i in 0..3 {
            text.push_str(&block(i, i as u8));
        }
        text.push_str("@:3 no Name\n");
        text.push_str(&block(3, 99));
        let (count, bank) = parse_str(&text);
        assert_eq!(3, count, "Count should equal the index of the terminator");
        assert!(bank.get(3).is_none(), "Nothing after the terminator should be read");
        assert_eq!(2, bank.get(2).unwrap().operators[0][operator::TL], "Expected left but got right");
    }

    #[test]
    fn count_without_terminator() {
        let text: std::string::String = (0..5).map(|i| block(i, 0)).collect();
        assert_eq!(5, parse_str(&text).0, "Every complete block should count");
    }

    #[test]
    fn stops_at_capacity() {
        let text: std::string::String = (0..MAX_PATCHES + 4).map(|i| block(i, 0)).collect();
        assert_eq!(MAX_PATCHES as u8, parse_str(&text).0, "Expected left but got right");
    }

    #[test]
    fn empty_file_is_invalid() {
        let (count, bank) = parse_str("// nothing here\n\n");
        assert_eq!(0, count, "Expected left but got right");
        assert!(!bank.is_valid(), "Bank should be flagged invalid");
    }

    #[test]
    fn truncated_block_is_discarded() {
        let text = std::format!("{}@:1 Cut\nLFO: 0 0 0 0 0\nCH: 1 2 3\n", BLOCK_0);
        assert_eq!(1, parse_str(&text).0, "Only the complete block should count");
    }

    #[test]
    fn out_of_sequence_markers_are_skipped() {
        let text = std::format!("@:7 Stray\n{}", BLOCK_0);
        assert_eq!(1, parse_str(&text).0, "Expected left but got right");
    }

    #[test]
    fn index_prefix_is_not_confused() {
        // "@:12" must not be taken for block 1
        let text = std::format!("{}@:12 no Name\n{}", BLOCK_0, block(1, 5));
        assert_eq!(2, parse_str(&text).0, "Expected left but got right");
    }

    #[test]
    fn malformed_numbers_are_tolerated() {
        let text = "@:0 Odd\nLFO: 1 2x 3 4 5\nCH: 300 +7 abc 9\nM1: 1\nC1:\nM2: 4 4 4 4 4 4 4 4 4 4 4 4 4\nC2: 0 0 0\n";
        let (count, bank) = parse_str(text);
        assert_eq!(1, count, "Malformed fields should not abort the block");
        let voice = bank.get(0).unwrap();
        assert_eq!([1, 2, 0, 0, 0], voice.lfo, "Parsing should stall at the first non-digit");
        assert_eq!([44, 7, 0, 0, 0, 0, 0], voice.channel, "Values should truncate to u8 and stall at text");
        assert_eq!([1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], voice.operators[0], "Missing fields read as zero");
        assert_eq!([4; 11], voice.operators[2], "Surplus fields are ignored");
    }

    #[test]
    fn reload_replaces_previous_contents() {
        let mut bank = PatchBank::new();
        let text: std::string::String = (0..4).map(|i| block(i, 0)).collect();
        parse(&mut text.as_str().lines(), &mut bank);
        parse(&mut BLOCK_0.lines(), &mut bank);
        assert_eq!(1, bank.valid_count(), "Expected left but got right");
        assert!(bank.get(1).is_none(), "Earlier voices should be gone");
    }
}
