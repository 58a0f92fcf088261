use crate::{parsers::parse_duration, parsers::parse_url};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use url::Url;

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(s) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if s == "null" {
        return Ok(None);
    }
    parse_duration(&s).map_err(serde::de::Error::custom).map(Some)
}

pub fn deserialize_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_url(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_optional_duration<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if let Some(duration) = duration {
        serialize_duration(duration, serializer)
    } else {
        serializer.serialize_none()
    }
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if duration.subsec_nanos() == 0 {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Timeouts {
        #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
        request: Duration,
        #[serde(
            default,
            deserialize_with = "deserialize_optional_duration",
            serialize_with = "serialize_optional_duration"
        )]
        poll: Option<Duration>,
        #[serde(deserialize_with = "deserialize_url")]
        endpoint: Url,
    }

    #[test]
    fn durations_read_from_yaml() {
        let yaml = "request: 1500ms\npoll: 2s\nendpoint: http://localhost:8545\n";
        let parsed: Timeouts = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.request, Duration::from_millis(1500));
        assert_eq!(parsed.poll, Some(Duration::from_secs(2)));

        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["request"], "1500ms");
        assert_eq!(json["poll"], "2s");
    }

    #[test]
    fn null_duration_is_none() {
        let parsed: Timeouts = serde_yaml::from_str("request: 1s\npoll: \"null\"\nendpoint: http://a.b\n").unwrap();
        assert_eq!(parsed.poll, None);
    }
}
