//! Reusable field extractors over trimmed receipt lines.

use std::sync::LazyLock;

use regex::Regex;

use super::FieldExtractor;
use crate::parser::ParsedItem;

static RE_DATE_DMY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2})[./-](\d{2})[./-](\d{4})\b").unwrap());
static RE_DATE_ISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static RE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2}):(\d{2})(?::\d{2})?\b").unwrap());
static RE_HAS_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{L}").unwrap());
static RE_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*").unwrap());
static RE_ITEM_QTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>.+?)\s+(?P<qty>\d+(?:[.,]\d+)?)\s*[xX×*]\s*(?P<unit>\d+(?:[.,]\d+)*)(?:\s+(?P<total>\d+(?:[.,]\d+)*))?\s*(?:[A-Za-z€$]{1,4})?$",
    )
    .unwrap()
});
static RE_ITEM_PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>.+?)\s+(?P<price>\d+(?:[.,]\d+)*)\s*(?:[A-Za-z€$]{1,4})?$").unwrap()
});

/// Which separator marks decimals in amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberStyle {
    DecimalDot,
    DecimalComma,
}

/// Parses amounts such as `1.234,56`, `1,234.56`, `12,50` or `1.200`.
pub fn parse_amount(raw: &str, style: NumberStyle) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal, thousands) = if dot > comma { ('.', ',') } else { (',', '.') };
            cleaned.replace(thousands, "").replace(decimal, ".")
        }
        (Some(_), None) => single_separator(&cleaned, '.', style == NumberStyle::DecimalComma),
        (None, Some(_)) => single_separator(&cleaned, ',', style == NumberStyle::DecimalDot),
        (None, None) => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `groups_thousands` is set when `sep` is this style's thousands separator,
/// in which case a lone separator followed by three digits groups thousands.
fn single_separator(value: &str, sep: char, groups_thousands: bool) -> String {
    let parts: Vec<&str> = value.split(sep).collect();
    let grouped =
        parts.len() > 2 || (groups_thousands && parts.last().is_some_and(|p| p.len() == 3));
    if grouped {
        parts.concat()
    } else {
        value.replace(sep, ".")
    }
}

pub fn has_letter(line: &str) -> bool {
    RE_HAS_LETTER.is_match(line)
}

pub fn looks_like_date(line: &str) -> bool {
    RE_DATE_DMY.is_match(line) || RE_DATE_ISO.is_match(line)
}

/// First line with letters that none of the `skip` patterns match.
pub struct FirstTextLine {
    pub skip: Vec<Regex>,
}

impl FieldExtractor<String> for FirstTextLine {
    fn extract(&self, lines: &[&str]) -> Option<String> {
        lines
            .iter()
            .find(|line| {
                has_letter(line)
                    && !looks_like_date(line)
                    && !self.skip.iter().any(|re| re.is_match(line))
            })
            .map(|line| line.to_string())
    }
}

/// First line matching `pattern`, returned whole.
pub struct MatchingLine {
    pub pattern: Regex,
}

impl FieldExtractor<String> for MatchingLine {
    fn extract(&self, lines: &[&str]) -> Option<String> {
        lines
            .iter()
            .find(|line| self.pattern.is_match(line))
            .map(|line| line.to_string())
    }
}

/// First date in any supported format, as `DD/MM/YYYY`.
pub struct DateField;

impl FieldExtractor<String> for DateField {
    fn extract(&self, lines: &[&str]) -> Option<String> {
        lines.iter().find_map(|line| {
            if let Some(caps) = RE_DATE_DMY.captures(line) {
                return Some(format!("{}/{}/{}", &caps[1], &caps[2], &caps[3]));
            }
            RE_DATE_ISO
                .captures(line)
                .map(|caps| format!("{}/{}/{}", &caps[3], &caps[2], &caps[1]))
        })
    }
}

/// First plausible clock time, as `HH:MM`.
pub struct TimeField;

impl FieldExtractor<String> for TimeField {
    fn extract(&self, lines: &[&str]) -> Option<String> {
        lines.iter().find_map(|line| {
            RE_TIME.captures_iter(line).find_map(|caps| {
                let hour: u32 = caps[1].parse().ok()?;
                let minute: u32 = caps[2].parse().ok()?;
                (hour < 24 && minute < 60).then(|| format!("{:02}:{:02}", hour, minute))
            })
        })
    }
}

/// Last amount on the last line keyed by `keyword` and not by `exclude`.
pub struct KeywordAmount {
    pub keyword: Regex,
    pub exclude: Option<Regex>,
    pub style: NumberStyle,
}

impl FieldExtractor<f64> for KeywordAmount {
    fn extract(&self, lines: &[&str]) -> Option<f64> {
        lines
            .iter()
            .rev()
            .filter(|line| self.keyword.is_match(line))
            .filter(|line| !self.exclude.as_ref().is_some_and(|re| re.is_match(line)))
            .find_map(|line| {
                RE_AMOUNT
                    .find_iter(line)
                    .last()
                    .and_then(|m| parse_amount(m.as_str(), self.style))
            })
    }
}

/// Lines of the form `name price` or `name qty x unit [total]`.
pub struct LineItems {
    pub skip: Regex,
    pub style: NumberStyle,
}

impl LineItems {
    fn parse_line(&self, line: &str) -> Option<ParsedItem> {
        if self.skip.is_match(line) || looks_like_date(line) {
            return None;
        }

        if let Some(caps) = RE_ITEM_QTY.captures(line) {
            let name = caps["name"].trim();
            let quantity = parse_amount(&caps["qty"], NumberStyle::DecimalDot)?;
            let unit = parse_amount(&caps["unit"], self.style)?;
            if has_letter(name) {
                return Some(ParsedItem::new(name, unit, quantity));
            }
        }

        let caps = RE_ITEM_PLAIN.captures(line)?;
        let name = caps["name"].trim();
        if !has_letter(name) {
            return None;
        }
        let price = parse_amount(&caps["price"], self.style)?;
        Some(ParsedItem::new(name, price, 1.0))
    }
}

impl FieldExtractor<Vec<ParsedItem>> for LineItems {
    fn extract(&self, lines: &[&str]) -> Option<Vec<ParsedItem>> {
        let items: Vec<ParsedItem> = lines.iter().filter_map(|l| self.parse_line(l)).collect();
        (!items.is_empty()).then_some(items)
    }
}
