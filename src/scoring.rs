use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::PrecisionLevel;

// Empirical weights; tune freely, nothing downstream depends on exact values.
const BASE_SCORE: f64 = 0.1;
const ADMIN_LEVEL_BONUS: [f64; 4] = [0.0, 0.3, 0.45, 0.6];
const HOUSE_NUMBER_BONUS: f64 = 0.1;
const UNIT_MARKER_BONUS: f64 = 0.1;
const FUZZY_PENALTY: f64 = 0.3;
const LENGTH_BONUS: f64 = 0.1;
const LENGTH_BAND: RangeInclusive<usize> = 6..=60;
const UNKNOWN_LEVEL_CONFIDENCE: f64 = 0.5;

pub const FUZZY_TOKENS: &[&str] = &[
    "附近", "周围", "一带", "周边", "大概", "大约", "左右", "边上", "旁边", "区域", "地段", "一片",
    "那边", "这边",
];

static PROVINCE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"省|自治区|特别行政区").expect("province token regex"));
static CITY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"市|州|盟|北京|上海|天津|重庆").expect("city token regex"));
static DISTRICT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[区县旗]").expect("district token regex"));
// "区" also appears in these, which are not districts.
static NON_DISTRICT_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"自治区|特别行政区|区域|小区").expect("non-district regex"));
static HOUSE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+号").expect("house number regex"));
static UNIT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:栋|幢|单元|室|层|楼|弄)").expect("unit marker regex"));

/// Heuristic specificity of a raw, un-normalized address, in `[0, 1]`.
pub fn score(address: &str) -> f64 {
    let text = address.trim();
    let mut score = BASE_SCORE;

    score += ADMIN_LEVEL_BONUS[admin_levels(text)];

    let mut street_bonus = 0.0;
    if HOUSE_NUMBER.is_match(text) {
        street_bonus += HOUSE_NUMBER_BONUS;
    }
    if UNIT_MARKER.is_match(text) {
        street_bonus += UNIT_MARKER_BONUS;
    }
    score += street_bonus;

    if is_fuzzy(text) {
        score -= FUZZY_PENALTY;
    }

    if LENGTH_BAND.contains(&text.chars().count()) {
        score += LENGTH_BONUS;
    }

    clamp_unit(score)
}

/// Number of administrative levels (province, city, district) mentioned.
pub fn admin_levels(address: &str) -> usize {
    let province = PROVINCE_TOKEN.is_match(address);
    let city = CITY_TOKEN.is_match(address);
    let district = DISTRICT_TOKEN.is_match(&NON_DISTRICT_WORDS.replace_all(address, ""));
    [province, city, district].into_iter().filter(|hit| *hit).count()
}

pub fn is_fuzzy(address: &str) -> bool {
    FUZZY_TOKENS.iter().any(|token| address.contains(token))
}

pub fn strip_fuzzy(address: &str) -> String {
    let mut cleaned = address.to_string();
    for token in FUZZY_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    cleaned.trim().to_string()
}

/// Confidence implied by the provider's precision label; finer is higher.
pub fn provider_confidence(level: Option<&str>) -> f64 {
    level
        .and_then(PrecisionLevel::parse)
        .map(PrecisionLevel::confidence)
        .unwrap_or(UNKNOWN_LEVEL_CONFIDENCE)
}

pub fn reconcile(heuristic: f64, provider: f64) -> f64 {
    clamp_unit(heuristic.max(provider))
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_qualifier_lowers_score() {
        assert!(score("北京朝阳区附近") < score("北京朝阳区"));
        assert!(score("上海浦东新区世纪大道一带") < score("上海浦东新区世纪大道"));
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let long = "很长的地址".repeat(40);
        let samples = [
            "",
            "附近",
            "x",
            "广东省广州市天河区体育西路103号B座2单元1101室",
            "新疆维吾尔自治区乌鲁木齐市天山区解放北路88号3栋5层",
            long.as_str(),
            "大概 左右 旁边 附近 周边",
        ];
        for sample in samples {
            let value = score(sample);
            assert!((0.0..=1.0).contains(&value), "{sample:?} scored {value}");
        }
    }

    #[test]
    fn more_administrative_levels_score_higher() {
        assert!(score("浙江省杭州市西湖区") > score("杭州市西湖区"));
        assert!(score("杭州市西湖区") > score("西湖区"));
    }

    #[test]
    fn street_detail_adds_confidence() {
        assert!(score("杭州市西湖区文三路90号") > score("杭州市西湖区文三路"));
        assert!(score("杭州市西湖区文三路90号2单元") > score("杭州市西湖区文三路90号"));
    }

    #[test]
    fn autonomous_region_is_not_a_district() {
        assert_eq!(admin_levels("广西壮族自治区"), 1);
        assert_eq!(admin_levels("广西壮族自治区南宁市青秀区"), 3);
    }

    #[test]
    fn detects_and_strips_fuzzy_tokens() {
        assert!(is_fuzzy("上海浦东一带"));
        assert!(!is_fuzzy("上海浦东新区"));
        assert_eq!(strip_fuzzy("火车站附近周边"), "火车站");
    }

    #[test]
    fn provider_confidence_follows_precision() {
        assert_eq!(provider_confidence(Some("门牌号")), 1.0);
        assert_eq!(provider_confidence(Some("区县")), 0.6);
        assert_eq!(provider_confidence(Some("兴趣点")), 0.5);
        assert_eq!(provider_confidence(None), 0.5);
        assert!(provider_confidence(Some("街道")) > provider_confidence(Some("市")));
    }

    #[test]
    fn reconcile_takes_the_maximum() {
        assert_eq!(reconcile(0.2, 0.6), 0.6);
        assert_eq!(reconcile(0.9, 0.4), 0.9);
        assert_eq!(reconcile(f64::NAN, 0.4), 0.4);
    }
}
