//! Static field-name table shared by every alert kind.

use std::collections::HashMap;
use std::sync::OnceLock;

pub const EVENT_TS: &str = "alphasoc.event.ts";
pub const PIPELINE: &str = "alphasoc.pipeline";
pub const THREAT_VALUE: &str = "alphasoc.threat.value";
pub const THREAT_SEVERITY: &str = "alphasoc.threat.severity";
pub const THREAT_TITLE: &str = "alphasoc.threat.title";
pub const WISDOM_DOMAIN: &str = "alphasoc.wisdom.domain";
pub const WISDOM_FLAGS: &str = "alphasoc.wisdom.flags";
pub const WISDOM_LABELS: &str = "alphasoc.wisdom.labels";
pub const DEST_IP_RAW: &str = "alphasoc.event.dest.ip_raw";
pub const DEST_URL_RAW: &str = "alphasoc.event.dest.url_raw";

/// Source key carrying the alert timestamp.
pub const SOURCE_TS: &str = "ts";
pub const SOURCE_DEST_IP: &str = "destIP";
pub const SOURCE_URL: &str = "url";

pub const KIND_IP: &str = "ip";
pub const KIND_HTTP: &str = "http";

/// Rendering of [`EVENT_TS`], second precision UTC.
pub const EVENT_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source field name to normalized path, independent of alert kind.
pub const EVENT_FIELDS: &[(&str, &str)] = &[
    // header
    ("srcHost", "source.address"),
    ("srcIP", "source.ip"),
    ("srcMac", "source.mac"),
    ("srcPort", "source.port"),
    ("srcUser", "alphasoc.event.src.user"),
    ("srcID", "alphasoc.event.src.id"),
    // dns
    ("query", "alphasoc.event.query"),
    ("qtype", "dns.question.type"),
    // http
    ("url", "url.original"),
    ("method", "alphasoc.event.method"),
    ("status", "alphasoc.event.status"),
    ("contentType", "alphasoc.event.content_type"),
    ("referrer", "alphasoc.event.referrer"),
    ("userAgent", "alphasoc.event.user_agent"),
    // ip
    ("destIP", "destination.ip"),
    ("destPort", "destination.port"),
    ("bytesIn", "destination.bytes"),
    ("bytesOut", "source.bytes"),
    ("proto", "network.transport"),
    ("duration", "event.duration"),
    ("app", "network.protocol"),
    ("action", "alphasoc.event.action"),
    // tls
    ("ja3", "alphasoc.event.ja3"),
    ("ja3s", "alphasoc.event.ja3s"),
    ("certHash", "alphasoc.event.cert_hash"),
    ("issuer", "alphasoc.event.issuer"),
    ("subject", "alphasoc.event.subject"),
    ("validFrom", "alphasoc.event.valid_from"),
    ("validTo", "alphasoc.event.valid_to"),
];

static FIELD_INDEX: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

/// Returns the normalized path for `source_key`, or `None` when the key is not mapped.
pub fn normalized_path(source_key: &str) -> Option<&'static str> {
    FIELD_INDEX
        .get_or_init(|| EVENT_FIELDS.iter().copied().collect())
        .get(source_key)
        .copied()
}
