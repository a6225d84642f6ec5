// Controller for the bus arrival board: refresh loop and cycle orchestration
use crate::board_config::{BoardConfig, StopConfig};
use crate::board_filters::Filter;
use crate::board_models::{
    fetch_snapshot, ArrivalSource, BoardModels, Result, ServiceNumber, StopSnapshot,
};
use crate::board_views::{BoardViews, DisplayRow};
use chrono::Utc;
use log::{debug, info, warn};
use std::io::{self, Write};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

/// Everything one refresh produced. Handed to the render step as a value.
#[derive(Debug, Clone)]
pub struct RefreshCycle {
    pub snapshot: StopSnapshot,
    pub rows: Vec<DisplayRow>,
    pub available: Vec<ServiceNumber>,
}

pub struct BoardControllers;

impl BoardControllers {
    /// Main application loop
    pub async fn run(config: &BoardConfig) -> Result<()> {
        let filter = config.filter();
        let source = BoardModels::new(&config.base_url, config.request_timeout())?;

        info!(
            "Watching {} stops every {}s",
            config.stops.len(),
            config.interval
        );
        BoardViews::show_welcome_screen(config, &filter);

        if config.once {
            let cycle = Self::refresh_cycle(&source, &config.stops, &filter).await;
            Self::display_cycle(1, &cycle, config, &filter);
            return Ok(());
        }

        Self::serve(&source, config, &filter, signal::ctrl_c()).await
    }

    /// Refresh on every tick until `shutdown` resolves. The shutdown future is
    /// also polled while a refresh is in flight, so a hung fetch cannot block it.
    pub async fn serve<S, F>(
        source: &S,
        config: &BoardConfig,
        filter: &Filter,
        shutdown: F,
    ) -> Result<()>
    where
        S: ArrivalSource,
        F: Future<Output = io::Result<()>>,
    {
        let mut ticker = interval(config.refresh_interval());
        // A slow refresh swallows the ticks it overlapped instead of queueing them
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let mut refresh_count: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = ticker.tick() => {
                    refresh_count += 1;
                    tokio::select! {
                        cycle = Self::refresh_cycle(source, &config.stops, filter) => {
                            Self::clear_screen();
                            Self::display_cycle(refresh_count, &cycle, config, filter);
                            BoardViews::show_footer(config.interval);
                            continue;
                        }
                        result = &mut shutdown => result,
                    }
                }
                result = &mut shutdown => result,
            };

            if let Err(e) = result {
                warn!("Could not listen for Ctrl+C ({})", e);
            }
            BoardViews::goodbye_message();
            return Ok(());
        }
    }

    /// Fetch all stops, then rebuild the rows from scratch.
    pub async fn refresh_cycle<S: ArrivalSource>(
        source: &S,
        stops: &[StopConfig],
        filter: &Filter,
    ) -> RefreshCycle {
        let snapshot = fetch_snapshot(source, stops).await;

        for stop in stops {
            info!(
                "Stop {} ({}): {} services",
                stop.label,
                stop.id,
                snapshot.service_count(&stop.id)
            );
        }

        let rows = BoardViews::build_rows(&snapshot, stops, filter, Utc::now());
        let available: Vec<ServiceNumber> = snapshot.service_union(stops).into_iter().collect();
        debug!("Built {} rows from {} services", rows.len(), available.len());

        RefreshCycle {
            snapshot,
            rows,
            available,
        }
    }

    fn display_cycle(
        refresh_count: u32,
        cycle: &RefreshCycle,
        config: &BoardConfig,
        filter: &Filter,
    ) {
        BoardViews::show_refresh_header(
            refresh_count,
            &cycle.snapshot,
            &config.stops,
            config.timezone,
        );
        BoardViews::show_rows(&cycle.rows, &config.stops);
        BoardViews::show_bus_options(&cycle.available, filter);

        let link = filter.share_link(&config.link_path, &cycle.available, &config.stops);
        BoardViews::show_share_link(&link);
    }

    /// Clear screen (ANSI)
    fn clear_screen() {
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }
}
