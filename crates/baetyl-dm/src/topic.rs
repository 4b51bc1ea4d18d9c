//! Device topic family `$baetyl/device/<device>/<kind>`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix shared by every device topic.
pub const DEVICE_TOPIC_PREFIX: &str = "$baetyl/device";

static DEVICE_TOPIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$baetyl/device/([^/]+)/([^/]+)$").expect("device topic regex is valid")
});

/// The eight kinds of device topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Desired property changes for the device.
    Delta,
    /// Property report from the driver.
    Report,
    /// Event sent to the driver.
    Event,
    /// Shadow read request.
    Get,
    /// Shadow read answer.
    GetResponse,
    /// Event raised by the driver.
    EventReport,
    /// Property read request raised by the driver.
    PropertyGet,
    /// Online/offline notification.
    LifecycleReport,
}

impl TopicKind {
    pub const ALL: [TopicKind; 8] = [
        TopicKind::Delta,
        TopicKind::Report,
        TopicKind::Event,
        TopicKind::Get,
        TopicKind::GetResponse,
        TopicKind::EventReport,
        TopicKind::PropertyGet,
        TopicKind::LifecycleReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Report => "report",
            Self::Event => "event",
            Self::Get => "get",
            Self::GetResponse => "getResponse",
            Self::EventReport => "eventReport",
            Self::PropertyGet => "propertyGet",
            Self::LifecycleReport => "lifecycleReport",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Kinds the runtime subscribes to and dispatches to mailboxes.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Delta | Self::GetResponse | Self::Event)
    }
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the topic of `device` for `kind`.
pub fn device_topic(device: &str, kind: TopicKind) -> String {
    format!("{}/{}/{}", DEVICE_TOPIC_PREFIX, device, kind.as_str())
}

/// Split a device topic into `(device, kind)`.
///
/// The kind is returned verbatim; callers decide which kinds they handle.
pub fn parse_topic(topic: &str) -> Option<(&str, &str)> {
    let caps = DEVICE_TOPIC_RE.captures(topic)?;
    let device = caps.get(1)?.as_str();
    let kind = caps.get(2)?.as_str();
    Some((device, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("$baetyl/device/dev1/delta"), Some(("dev1", "delta")));
        assert_eq!(
            parse_topic("$baetyl/device/boiler-2/getResponse"),
            Some(("boiler-2", "getResponse"))
        );
        assert_eq!(parse_topic("$baetyl/device/dev1/unknown"), Some(("dev1", "unknown")));
    }

    #[test]
    fn test_parse_topic_rejects_malformed() {
        for topic in [
            "",
            "$baetyl/device/dev1",
            "$baetyl/device//delta",
            "$baetyl/device/dev1/",
            "$baetyl/device/a/b/delta",
            "baetyl/device/dev1/delta",
            "x$baetyl/device/dev1/delta",
        ] {
            assert_eq!(parse_topic(topic), None, "topic {:?}", topic);
        }
    }

    #[test]
    fn test_device_topic_round_trip() {
        for kind in TopicKind::ALL {
            let topic = device_topic("dev1", kind);
            let (device, parsed) = parse_topic(&topic).unwrap();
            assert_eq!(device, "dev1");
            assert_eq!(TopicKind::parse(parsed), Some(kind));
        }
    }

    #[test]
    fn test_inbound_kinds() {
        let inbound: Vec<_> = TopicKind::ALL.into_iter().filter(|k| k.is_inbound()).collect();
        assert_eq!(inbound, vec![TopicKind::Delta, TopicKind::Event, TopicKind::GetResponse]);
    }
}
