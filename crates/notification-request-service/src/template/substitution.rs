//! `${{name}}` 占位符替换

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

// 匹配 ${{variable_name}}，变量名支持字母、数字、下划线
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{(\w+)\}\}").unwrap());

/// 替换所有占位符，未提供的参数替换为空串
pub fn substitute(template: &str, params: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            params.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let text = substitute(
            "${{userName}}님, 주문 ${{orderId}} 배송 시작 ${{missing}}!",
            &params(&[("userName", "Alice"), ("orderId", "A-1")]),
        );
        assert_eq!(text, "Alice님, 주문 A-1 배송 시작 !");
        assert!(!has_placeholders(&text));
    }

    #[test]
    fn test_non_placeholder_braces_untouched() {
        let text = substitute("${name} {{name}} $${{x}}", &params(&[("x", "1")]));
        assert_eq!(text, "${name} {{name}} $1");
    }

    #[test]
    fn test_repeated_placeholder() {
        let text = substitute("${{a}}-${{a}}", &params(&[("a", "z")]));
        assert_eq!(text, "z-z");
    }
}
