//! 预置数据
//!
//! 固定的用户、分群与模板，便于本地联调时复现同一批收件人与文案。

use crate::models::{Channel, MockTemplate, MockUser};
use crate::store::ProviderStore;

/// (userId, userName, language)
const USERS: [(&str, &str, &str); 6] = [
    ("user-001", "Alice Kim", "ko"),
    ("user-002", "Bob Lee", "ko"),
    ("user-100", "Charlie", "en"),
    ("user-101", "Dana", "ko"),
    ("user-102", "Eve", "en"),
    ("user-555", "Frank", "ko"),
];

const SEGMENTS: [(&str, &[&str]); 2] = [
    ("VIP_CUSTOMERS", &["user-001", "user-555"]),
    ("NEW_USERS", &["user-100", "user-101", "user-102"]),
];

/// (templateId, language, title, body)
const TEMPLATES: [(&str, &str, &str, &str); 6] = [
    (
        "NEW_PRODUCT_LAUNCH",
        "ko",
        "[신제품 출시] ${{productName}}",
        "${{userName}}님, ${{productName}}가 ${{launchDate}}에 출시됩니다. 많은 관심 부탁드립니다!",
    ),
    (
        "NEW_PRODUCT_LAUNCH",
        "en",
        "[New Arrival] ${{productName}}",
        "Hi ${{userName}}, ${{productName}} launches on ${{launchDate}}. Stay tuned!",
    ),
    (
        "ORDER_SHIPPED",
        "ko",
        "주문이 발송되었습니다: ${{productName}}",
        "주문하신 ${{productName}} 상품이 ${{shippingCompany}}를 통해 발송되었습니다. 운송장 번호는 ${{trackingNumber}}입니다.",
    ),
    (
        "ORDER_SHIPPED",
        "en",
        "Your order has shipped: ${{productName}}",
        "Your ${{productName}} is on its way with ${{shippingCompany}}. Tracking number: ${{trackingNumber}}.",
    ),
    (
        "VIP_DISCOUNT_EMAIL",
        "ko",
        "[VIP 전용 혜택]",
        "VIP 고객님께 드리는 ${{discountRate}} 할인 혜택! 지금 ${{couponCode}} 쿠폰을 사용해보세요.",
    ),
    (
        "VIP_DISCOUNT_EMAIL",
        "en",
        "[VIP Exclusive]",
        "An exclusive ${{discountRate}} discount for our VIP customers! Use coupon ${{couponCode}} today.",
    ),
];

pub fn users() -> Vec<MockUser> {
    USERS
        .iter()
        .map(|(id, name, language)| MockUser::new(id, name, language))
        .collect()
}

/// 每个模板在两种语言、全部渠道下各有一份
pub fn templates() -> Vec<MockTemplate> {
    TEMPLATES
        .iter()
        .flat_map(|(template_id, language, title, body)| {
            Channel::ALL.into_iter().map(move |channel| MockTemplate {
                template_id: template_id.to_string(),
                channel,
                language: language.to_string(),
                title_template: Some(title.to_string()),
                body_template: body.to_string(),
            })
        })
        .collect()
}

/// 填充存储
pub fn seed(store: &ProviderStore) {
    for user in users() {
        store.users.insert(&user.user_id.clone(), user);
    }
    for (name, members) in SEGMENTS {
        store
            .segments
            .insert(name, members.iter().map(|m| m.to_string()).collect());
    }
    for template in templates() {
        store.add_template(template);
    }
}
