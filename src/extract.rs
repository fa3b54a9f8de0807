//! Pattern-based extraction of administrative tokens from Chinese addresses.
//!
//! Lookups go through [`AdminExtractor`] so a gazetteer-backed implementation
//! can replace the regex heuristics without touching the strategy chain.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::normalize::normalize;

/// City-like tokens in priority order: province+city, autonomous region+city,
/// SAR or municipality, prefecture, county.
static CITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:[^省]+省)?[^市]+市",
        r"(?:[^自治区]+自治区)?[^市]+市",
        r"北京|上海|天津|重庆|[^特别行政区]+特别行政区",
        r"[^州]+州",
        r"[^县]+县",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("city pattern"))
    .collect()
});

static PROVINCE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+?(?:省|自治区|特别行政区)").expect("province prefix"));
static CITY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:.+?市|.+?自治州|.+?地区|.+?盟|北京|上海|天津|重庆)").expect("city prefix")
});
static DISTRICT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+?(?:区|县|旗)").expect("district prefix"));

static FINE_GRAINED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"地下\d+(?:层|楼)?",
        r"|\d+号楼|\d+号院|\d+号",
        r"|\d+弄|\d+[幢栋]|\d+单元|\d+[室层楼]",
        r"|[A-Za-z]\d*座|[A-Za-z]\d+",
    ))
    .expect("fine-grained pattern")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdminComponents {
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
}

impl AdminComponents {
    pub fn is_empty(&self) -> bool {
        self.province.is_none() && self.city.is_none() && self.district.is_none()
    }

    pub fn joined(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(
            [&self.province, &self.city, &self.district]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect(),
        )
    }
}

pub trait AdminExtractor: Send + Sync {
    /// First city-like token found in `address`.
    fn extract_city(&self, address: &str) -> Option<String>;

    /// Leading province, city and district components of `address`.
    fn admin_components(&self, address: &str) -> AdminComponents;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexAdminExtractor;

impl AdminExtractor for RegexAdminExtractor {
    fn extract_city(&self, address: &str) -> Option<String> {
        CITY_PATTERNS
            .iter()
            .find_map(|pattern| pattern.find(address))
            .map(|found| found.as_str().trim().to_string())
            .filter(|token| !token.is_empty())
    }

    fn admin_components(&self, address: &str) -> AdminComponents {
        let mut rest = address.trim();
        let province = take_prefix(&mut rest, &PROVINCE_PREFIX);
        let city = take_prefix(&mut rest, &CITY_PREFIX);
        let district = take_prefix(&mut rest, &DISTRICT_PREFIX);
        AdminComponents {
            province,
            city,
            district,
        }
    }
}

fn take_prefix(rest: &mut &str, pattern: &Regex) -> Option<String> {
    let found = pattern.find(rest)?;
    let token = found.as_str().trim().to_string();
    *rest = rest[found.end()..].trim_start();
    Some(token)
}

/// Removes the first occurrence of `token` and re-normalizes the remainder.
pub fn remove_token(address: &str, token: &str) -> String {
    normalize(&address.replacen(token, " ", 1))
}

/// Drops house numbers, building/unit/floor/room markers, alphanumeric unit
/// codes and below-ground markers.
pub fn simplify(address: &str) -> String {
    normalize(&FINE_GRAINED.replace_all(address, " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_province_and_city() {
        let extractor = RegexAdminExtractor;
        assert_eq!(
            extractor.extract_city("浙江省杭州市西湖区文三路90号").as_deref(),
            Some("浙江省杭州市")
        );
        assert_eq!(
            extractor.extract_city("北京市朝阳区建国路").as_deref(),
            Some("北京市")
        );
    }

    #[test]
    fn falls_back_through_pattern_priority() {
        let extractor = RegexAdminExtractor;
        assert_eq!(extractor.extract_city("上海浦东一带").as_deref(), Some("上海"));
        assert_eq!(
            extractor.extract_city("香港特别行政区").as_deref(),
            Some("香港特别行政区")
        );
        assert_eq!(
            extractor.extract_city("黔东南苗族侗族自治州凯里").as_deref(),
            Some("黔东南苗族侗族自治州")
        );
        assert_eq!(extractor.extract_city("长丰县双墩镇").as_deref(), Some("长丰县"));
        assert_eq!(extractor.extract_city("asdkjasd"), None);
    }

    #[test]
    fn splits_administrative_components() {
        let extractor = RegexAdminExtractor;
        let components = extractor.admin_components("广东省广州市天河区体育西路103号");
        assert_eq!(components.province.as_deref(), Some("广东省"));
        assert_eq!(components.city.as_deref(), Some("广州市"));
        assert_eq!(components.district.as_deref(), Some("天河区"));
        assert_eq!(components.joined().as_deref(), Some("广东省广州市天河区"));
    }

    #[test]
    fn components_without_province() {
        let extractor = RegexAdminExtractor;
        let components = extractor.admin_components("北京市朝阳区附近");
        assert!(components.province.is_none());
        assert_eq!(components.joined().as_deref(), Some("北京市朝阳区"));

        let components = extractor.admin_components("上海浦东一带");
        assert_eq!(components.city.as_deref(), Some("上海"));
        assert!(components.district.is_none());
    }

    #[test]
    fn autonomous_region_is_a_province() {
        let components =
            RegexAdminExtractor.admin_components("广西壮族自治区南宁市青秀区民族大道");
        assert_eq!(components.province.as_deref(), Some("广西壮族自治区"));
        assert_eq!(components.city.as_deref(), Some("南宁市"));
        assert_eq!(components.district.as_deref(), Some("青秀区"));
    }

    #[test]
    fn no_components_for_unstructured_text() {
        let components = RegexAdminExtractor.admin_components("asdkjasd");
        assert!(components.is_empty());
        assert!(components.joined().is_none());
    }

    #[test]
    fn simplifies_fine_grained_tokens() {
        assert_eq!(
            simplify("广州市天河区体育西路103号B座2单元1101室"),
            "广州市天河区体育西路"
        );
        assert_eq!(simplify("上海市徐汇区漕溪北路地下1层"), "上海市徐汇区漕溪北路");
        assert_eq!(simplify("杭州市西湖区3号楼 A12"), "杭州市西湖区");
        assert_eq!(simplify("没有门牌"), "没有门牌");
    }

    #[test]
    fn removes_only_first_token_occurrence() {
        assert_eq!(remove_token("浙江省杭州市西湖区", "浙江省杭州市"), "西湖区");
        assert_eq!(remove_token("北京市 朝阳区", "北京市"), "朝阳区");
        assert_eq!(remove_token("北京市", "北京市"), "");
    }
}
