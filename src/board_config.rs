// Command line and environment configuration for the bus arrival board
use crate::board_filters::{Filter, FilterKeys};
use crate::board_models::{BoardError, BoardModels, Result};
use chrono_tz::Tz;
use clap::Parser;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://arrivelah2.busrouter.sg/";

/// A configured bus stop: a side label shown in the table and the upstream stop id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopConfig {
    pub label: String,
    pub id: String,
}

impl FromStr for StopConfig {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        let (label, id) = s.split_once('=').ok_or_else(|| {
            BoardError::ConfigError(format!("Stop '{}' must look like LABEL=ID", s))
        })?;

        let label = label.trim();
        let id = id.trim();
        if label.is_empty() || id.is_empty() {
            return Err(BoardError::ConfigError(format!(
                "Stop '{}' needs both a label and an id",
                s
            )));
        }

        Ok(StopConfig {
            label: label.to_string(),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for StopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.id)
    }
}

fn parse_timezone(s: &str) -> std::result::Result<Tz, String> {
    s.parse::<Tz>().map_err(|e| format!("Unknown time zone '{}': {}", s, e))
}

#[derive(Debug, Parser)]
#[command(name = "bus_board", version, about = "Live bus arrival board for a pair of stops")]
pub struct BoardConfig {
    /// Arrival API endpoint, queried as <base-url>?id=<stop>
    #[arg(long, env = "BUS_BOARD_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Stop to watch, as LABEL=ID (repeatable)
    #[arg(
        long = "stop",
        value_name = "LABEL=ID",
        default_values = ["college=51099", "opposite=51091"]
    )]
    pub stops: Vec<StopConfig>,

    /// Page-style query string, e.g. "?buses=151,154&side=college"
    #[arg(long, env = "BUS_BOARD_QUERY")]
    pub query: Option<String>,

    /// Comma-separated services to show (takes precedence over --query)
    #[arg(long)]
    pub buses: Option<String>,

    /// Comma-separated stop labels or ids to show (takes precedence over --query)
    #[arg(long)]
    pub side: Option<String>,

    /// Query keys accepted for the bus filter, first match wins
    #[arg(long, value_delimiter = ',', default_values = ["buses", "bus", "services", "b"])]
    pub bus_keys: Vec<String>,

    /// Query keys accepted for the side filter, first match wins
    #[arg(long, value_delimiter = ',', default_values = ["side", "sides"])]
    pub side_keys: Vec<String>,

    /// Seconds between refreshes
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = BoardModels::REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Time zone for the refresh header
    #[arg(
        long,
        env = "BUS_BOARD_TIMEZONE",
        default_value = "Asia/Singapore",
        value_parser = parse_timezone
    )]
    pub timezone: Tz,

    /// Path used when building the shareable link
    #[arg(long, default_value = "/")]
    pub link_path: String,

    /// Refresh once, print the board and exit
    #[arg(long)]
    pub once: bool,
}

impl BoardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stops.is_empty() {
            return Err(BoardError::ConfigError("At least one stop is required".to_string()));
        }

        let mut seen = HashSet::new();
        for stop in &self.stops {
            if !seen.insert(stop.id.as_str()) {
                return Err(BoardError::ConfigError(format!(
                    "Stop id {} is configured more than once",
                    stop.id
                )));
            }
        }

        Ok(())
    }

    pub fn filter_keys(&self) -> FilterKeys {
        FilterKeys {
            bus_keys: self.bus_keys.clone(),
            side_keys: self.side_keys.clone(),
        }
    }

    /// Build the session filter. --buses and --side are placed ahead of the
    /// query pairs so they win the first-match lookup.
    pub fn filter(&self) -> Filter {
        let keys = self.filter_keys();
        let mut pairs: Vec<(String, String)> = Vec::new();

        if let (Some(buses), Some(key)) = (&self.buses, keys.bus_keys.first()) {
            pairs.push((key.clone(), buses.clone()));
        }
        if let (Some(side), Some(key)) = (&self.side, keys.side_keys.first()) {
            pairs.push((key.clone(), side.clone()));
        }
        if let Some(query) = &self.query {
            pairs.extend(Filter::query_pairs(query));
        }

        Filter::from_pairs(&pairs, &self.stops, &keys)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}
