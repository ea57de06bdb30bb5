//! Startup-only lookups of the agent's public addresses and country.

use std::time::Duration;

use log::{debug, error, info};
use monitor_proto::msg::GeoLocation;

use crate::http_util;

/// Placeholder for an address that could not be resolved.
pub const UNRESOLVED_IP: &str = "None";
const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    pub name: String,
    pub code: String,
}

impl Default for Country {
    fn default() -> Self {
        Self {
            name: UNKNOWN_COUNTRY.to_owned(),
            code: UNKNOWN_COUNTRY.to_owned(),
        }
    }
}

impl Country {
    /// Applies the fixed territory naming rules to a lookup result.
    pub fn normalized(name: &str, code: &str) -> Self {
        if name.contains("Hong Kong") {
            Self {
                name: format!("{name}, SAR"),
                code: code.to_owned(),
            }
        } else if name.contains("Taiwan") {
            Self {
                name: format!("{name} Province"),
                code: "CN".to_owned(),
            }
        } else {
            Self {
                name: name.to_owned(),
                code: code.to_owned(),
            }
        }
    }
}

/// Public addresses and country, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub ipv4: String,
    pub ipv6: String,
    pub country: Country,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            ipv4: UNRESOLVED_IP.to_owned(),
            ipv6: UNRESOLVED_IP.to_owned(),
            country: Country::default(),
        }
    }
}

pub struct Locator<'a> {
    pub ipv4_api: &'a str,
    pub ipv6_api: &'a str,
    pub geo_api: &'a str,
    pub timeout: Duration,
}

impl Locator<'_> {
    /// Never fails; anything unresolved falls back to its placeholder.
    pub async fn resolve(&self) -> Location {
        let ipv4 = self.public_ip(self.ipv4_api).await;
        let ipv6 = self.public_ip(self.ipv6_api).await;
        info!("public addresses: {ipv4} / {ipv6}");

        let country = self.country().await;
        info!("country: {} ({})", country.name, country.code);

        Location {
            ipv4,
            ipv6,
            country,
        }
    }

    async fn public_ip(&self, api: &str) -> String {
        match http_util::get_text(api, self.timeout).await {
            Ok(ip) if !ip.is_empty() => ip,
            Ok(_) => {
                error!("empty response from {api}");
                UNRESOLVED_IP.to_owned()
            }
            Err(e) => {
                error!("failed to resolve public address via {api}: {e}");
                UNRESOLVED_IP.to_owned()
            }
        }
    }

    async fn country(&self) -> Country {
        let res: anyhow::Result<GeoLocation> = async {
            let body = http_util::get_text(self.geo_api, self.timeout).await?;
            debug!("geolocation response: {body}");
            Ok(serde_json::from_str(&body)?)
        }
        .await;

        match res {
            Ok(geo) => Country::normalized(&geo.country_name, &geo.country_code),
            Err(e) => {
                error!("failed to get country via {}: {e}", self.geo_api);
                Country::default()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use log::{Level, Log, Metadata, Record};

    use super::*;

    struct CapturingLogger {
        records: Mutex<Vec<(Level, String)>>,
    }

    impl Log for CapturingLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if let Ok(mut records) = self.records.lock() {
                records.push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: CapturingLogger = CapturingLogger {
        records: Mutex::new(Vec::new()),
    };

    fn captured(needle: &str) -> Vec<(Level, String)> {
        LOGGER
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, msg)| msg.contains(needle))
            .cloned()
            .collect()
    }

    #[test]
    fn test_hong_kong_is_suffixed() {
        let country = Country::normalized("Hong Kong", "HK");
        assert_eq!(country.name, "Hong Kong, SAR");
        assert_eq!(country.code, "HK");
    }

    #[test]
    fn test_taiwan_is_suffixed_and_recoded() {
        let country = Country::normalized("Taiwan", "TW");
        assert_eq!(country.name, "Taiwan Province");
        assert_eq!(country.code, "CN");
    }

    #[test]
    fn test_other_countries_pass_through() {
        let country = Country::normalized("Germany", "DE");
        assert_eq!(country, Country {
            name: "Germany".to_owned(),
            code: "DE".to_owned(),
        });
    }

    #[tokio::test]
    async fn test_unreachable_services_fall_back_to_placeholders() {
        // nothing listens on the discard port of the loopback interface
        let locator = Locator {
            ipv4_api: "http://127.0.0.1:9/",
            ipv6_api: "http://127.0.0.1:9/",
            geo_api: "http://127.0.0.1:9/json",
            timeout: Duration::from_secs(2),
        };

        assert_eq!(locator.resolve().await, Location::default());
    }

    #[tokio::test]
    async fn test_failed_lookups_are_logged_as_errors() {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        let locator = Locator {
            ipv4_api: "http://127.0.0.1:9/v4-lookup",
            ipv6_api: "http://127.0.0.1:9/v6-lookup",
            geo_api: "http://127.0.0.1:9/geo-lookup",
            timeout: Duration::from_secs(2),
        };
        locator.resolve().await;

        for needle in ["v4-lookup", "v6-lookup", "geo-lookup"] {
            let records = captured(needle);
            assert!(!records.is_empty(), "nothing logged for {needle}");
            assert!(records.iter().all(|(level, _)| *level == Level::Error));
        }
    }
}
