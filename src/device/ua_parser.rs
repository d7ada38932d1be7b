use axum::http::{header, HeaderMap};
use woothee::parser::Parser;

use crate::storage::models::{DeviceInfo, DeviceKind};

/// Describe the device behind a sign-in request from its `User-Agent` header.
///
/// A missing or non-UTF-8 header yields an empty, `Unknown` description.
pub fn parse_user_agent(headers: &HeaderMap) -> DeviceInfo {
    let raw = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let mut info = DeviceInfo {
        raw_user_agent: raw.to_string(),
        ..DeviceInfo::default()
    };

    if let Some(parsed) = Parser::new().parse(raw) {
        info.kind = device_kind(parsed.category);
        info.browser = known(parsed.name);
        info.browser_version = known(parsed.version);
        info.os = known(parsed.os);
        info.os_version = known(&parsed.os_version);
    }

    info
}

fn device_kind(category: &str) -> DeviceKind {
    match category {
        "pc" => DeviceKind::Desktop,
        "smartphone" | "mobilephone" => DeviceKind::Mobile,
        "tablet" => DeviceKind::Tablet,
        "crawler" => DeviceKind::Bot,
        _ => DeviceKind::Unknown,
    }
}

/// woothee reports unknown fields as "UNKNOWN"
fn known(value: &str) -> Option<String> {
    match value {
        "" | "UNKNOWN" => None,
        other => Some(other.to_string()),
    }
}
