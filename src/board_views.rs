// Views for the bus arrival board: arrival formatting, row building and terminal output
use crate::board_config::{BoardConfig, StopConfig};
use crate::board_filters::Filter;
use crate::board_models::{ServiceNumber, StopSnapshot};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;

pub const NOT_AVAILABLE: &str = "N/A";
pub const ARRIVING_NOW: &str = "Arriving now";
pub const NO_ENTRY: &str = "-";
pub const NO_DATA_MESSAGE: &str = "No data for current filters";

// ============================================================================
// Row model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellContent {
    /// Stop excluded by the side filter. Rendered as "-", like a missing entry.
    Hidden,
    /// The stop has no entry for this service.
    Missing,
    Arrivals { next: String, subsequent: String },
}

impl fmt::Display for CellContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellContent::Hidden | CellContent::Missing => write!(f, "{}", NO_ENTRY),
            CellContent::Arrivals { next, subsequent } => {
                write!(f, "Next: {} | Sub: {}", next, subsequent)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCell {
    pub stop_id: String,
    pub content: CellContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayRow {
    Service {
        service: ServiceNumber,
        per_stop: Vec<StopCell>,
    },
    /// Stands in for the whole table when no service survives the filters.
    NoData,
}

impl DisplayRow {
    pub fn service(&self) -> Option<&ServiceNumber> {
        match self {
            DisplayRow::Service { service, .. } => Some(service),
            DisplayRow::NoData => None,
        }
    }

    pub fn cell(&self, stop_id: &str) -> Option<&StopCell> {
        match self {
            DisplayRow::Service { per_stop, .. } => per_stop.iter().find(|c| c.stop_id == stop_id),
            DisplayRow::NoData => None,
        }
    }
}

pub struct BoardViews;

impl BoardViews {
    // ========================================================================
    // Formatting and row building
    // ========================================================================

    /// Minutes until `timestamp`, relative to `now`.
    pub fn format_arrival(timestamp: Option<&str>, now: DateTime<Utc>) -> String {
        let Some(raw) = timestamp else {
            return NOT_AVAILABLE.to_string();
        };
        let Ok(at) = DateTime::parse_from_rfc3339(raw.trim()) else {
            return NOT_AVAILABLE.to_string();
        };

        let millis = (at.with_timezone(&Utc) - now).num_milliseconds();
        let minutes = (millis as f64 / 60_000.0).round();

        if !minutes.is_finite() {
            NOT_AVAILABLE.to_string()
        } else if minutes <= 0.0 {
            ARRIVING_NOW.to_string()
        } else {
            format!("{} min", minutes as i64)
        }
    }

    /// Rows for every service seen at any configured stop, filtered and in
    /// natural order. Returns a lone `NoData` row when nothing is left.
    pub fn build_rows(
        snapshot: &StopSnapshot,
        stops: &[StopConfig],
        filter: &Filter,
        now: DateTime<Utc>,
    ) -> Vec<DisplayRow> {
        let services: Vec<ServiceNumber> = snapshot
            .service_union(stops)
            .into_iter()
            .filter(|s| filter.allows_service(s))
            .collect();

        if services.is_empty() {
            return vec![DisplayRow::NoData];
        }

        services
            .into_iter()
            .map(|service| {
                let per_stop = stops
                    .iter()
                    .map(|stop| StopCell {
                        stop_id: stop.id.clone(),
                        content: Self::cell_content(snapshot, stop, &service, filter, now),
                    })
                    .collect();
                DisplayRow::Service { service, per_stop }
            })
            .collect()
    }

    fn cell_content(
        snapshot: &StopSnapshot,
        stop: &StopConfig,
        service: &ServiceNumber,
        filter: &Filter,
        now: DateTime<Utc>,
    ) -> CellContent {
        if !filter.shows_stop(&stop.id) {
            return CellContent::Hidden;
        }

        match snapshot.entry(&stop.id, service) {
            Some(entry) => CellContent::Arrivals {
                next: Self::format_arrival(entry.next.as_deref(), now),
                subsequent: Self::format_arrival(entry.subsequent.as_deref(), now),
            },
            None => CellContent::Missing,
        }
    }

    // ========================================================================
    // Terminal output
    // ========================================================================

    pub fn show_welcome_screen(config: &BoardConfig, filter: &Filter) {
        println!("\n{}", "═".repeat(70));
        println!("  🚌 BUS ARRIVAL BOARD");
        println!("{}", "═".repeat(70));
        println!("\n  📍 Stops:");
        for stop in &config.stops {
            let marker = if filter.shows_stop(&stop.id) { "✓" } else { "·" };
            println!("     {} {} ({})", marker, stop.label, stop.id);
        }
        match &filter.bus_allow_list {
            Some(buses) => {
                let names: Vec<&str> = buses.iter().map(|s| s.as_str()).collect();
                println!("\n  🔎 Buses: {}", names.join(", "));
            }
            None => println!("\n  🔎 Buses: all"),
        }
        println!("\n  🌐 Data source: {}", config.base_url);
        println!("{}", "═".repeat(70));
    }

    pub fn show_refresh_header(
        refresh_count: u32,
        snapshot: &StopSnapshot,
        stops: &[StopConfig],
        tz: Tz,
    ) {
        let local = snapshot.fetched_at.with_timezone(&tz);

        println!("\n{}", "═".repeat(70));
        println!("🔄 BUS ARRIVALS - Update #{}", refresh_count);
        println!("📅 {}", local.format("%A, %B %d, %Y at %H:%M:%S %Z"));
        let counts: Vec<String> = stops
            .iter()
            .map(|s| format!("{}: {}", s.label, snapshot.service_count(&s.id)))
            .collect();
        println!("📊 Services reported | {}", counts.join(" | "));
        println!("{}", "═".repeat(70));
    }

    /// Arrivals table, one column per configured stop. Cells of stops hidden
    /// by the side filter are blanked to "-".
    pub fn table_lines(rows: &[DisplayRow], stops: &[StopConfig]) -> Vec<String> {
        let service_width = rows
            .iter()
            .filter_map(|r| r.service())
            .map(|s| s.as_str().len())
            .max()
            .unwrap_or(0)
            .max("Bus".len());

        let headers: Vec<String> = stops
            .iter()
            .map(|s| format!("{} ({})", s.label, s.id))
            .collect();
        let widths: Vec<usize> = stops
            .iter()
            .zip(&headers)
            .map(|(stop, header)| {
                rows.iter()
                    .filter_map(|r| r.cell(&stop.id))
                    .map(|c| c.content.to_string().chars().count())
                    .max()
                    .unwrap_or(0)
                    .max(header.chars().count())
            })
            .collect();

        let mut header_line = format!("  {:<w$}", "Bus", w = service_width);
        for (header, width) in headers.iter().zip(&widths) {
            header_line.push_str(&format!("  │ {:<w$}", header, w = *width));
        }
        let rule = format!("  {}", "─".repeat(header_line.chars().count().saturating_sub(2)));

        let mut lines = vec![header_line, rule];
        for row in rows {
            match row {
                DisplayRow::NoData => lines.push(format!("  ⚠️  {}", NO_DATA_MESSAGE)),
                DisplayRow::Service { service, .. } => {
                    let mut line = format!("  {:<w$}", service.as_str(), w = service_width);
                    for (stop, width) in stops.iter().zip(&widths) {
                        let text = row
                            .cell(&stop.id)
                            .map(|c| c.content.to_string())
                            .unwrap_or_else(|| NO_ENTRY.to_string());
                        line.push_str(&format!("  │ {:<w$}", text, w = *width));
                    }
                    lines.push(line.trim_end().to_string());
                }
            }
        }
        lines
    }

    pub fn show_rows(rows: &[DisplayRow], stops: &[StopConfig]) {
        for line in Self::table_lines(rows, stops) {
            println!("{}", line);
        }
    }

    /// Every service currently reported, checked when it passes the filter.
    pub fn show_bus_options(available: &[ServiceNumber], filter: &Filter) {
        if available.is_empty() {
            return;
        }

        println!("\n🚌 Services at these stops:");
        let options: Vec<String> = available
            .iter()
            .map(|s| {
                let mark = if filter.allows_service(s) { "x" } else { " " };
                format!("[{}] {}", mark, s)
            })
            .collect();
        for chunk in options.chunks(6) {
            println!("   {}", chunk.join("  "));
        }
    }

    pub fn show_share_link(link: &str) {
        println!("\n🔗 Share this view: {}", link);
    }

    pub fn show_footer(interval_secs: u64) {
        println!("\n{}", "─".repeat(70));
        println!("⏱️  Next refresh in {} seconds (Ctrl+C to exit)", interval_secs);
        println!("{}", "─".repeat(70));
    }

    pub fn goodbye_message() {
        println!("\n👋 Goodbye! Have a good trip.");
    }
}
