use std::sync::LazyLock;

use regex::Regex;

use super::fields::{FirstTextLine, KeywordAmount, LineItems, MatchingLine, NumberStyle};
use super::RuleBasedParser;

static RE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(NIPT|TVSH|FATUR[EË]|LEK[EË]?|TOTALI|SHUMA)\b|\bNR\.?\s*FISKAL\b").unwrap()
});
static RE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(RRUGA|BULEVARDI|TIRAN[EË]|DURR[EË]S|SHKOD[EË]R)\b|\bRR\.").unwrap()
});
static RE_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(TOTALI|TOTAL|SHUMA)\b|P[EË]R T['’]U PAGUAR").unwrap()
});
static RE_TOTAL_EXCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(TVSH|NENTOTALI|NËNTOTALI)\b").unwrap());
static RE_SKIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(NIPT|NIVF|NSLF|TVSH|TOTALI?|N[EË]NTOTALI|SHUMA|PAGUAR|KESH|KUSUR|KART[EË]|ZBRITJE|FATUR[EË]|KODI|OPERATOR|TEL)\b|\bNR\.?\s*FISKAL\b",
    )
    .unwrap()
});

/// Parser for Albanian fiscal receipts.
pub(super) fn parser() -> RuleBasedParser {
    RuleBasedParser::new(
        "albanian",
        Box::new(|text: &str| RE_MARKERS.is_match(text)),
        Box::new(LineItems {
            skip: RE_SKIP.clone(),
            style: NumberStyle::DecimalComma,
        }),
    )
    .with_store_name(Box::new(FirstTextLine {
        skip: vec![RE_MARKERS.clone(), RE_ADDRESS.clone()],
    }))
    .with_store_location(Box::new(MatchingLine {
        pattern: RE_ADDRESS.clone(),
    }))
    .with_total(Box::new(KeywordAmount {
        keyword: RE_TOTAL.clone(),
        exclude: Some(RE_TOTAL_EXCLUDE.clone()),
        style: NumberStyle::DecimalComma,
    }))
}
