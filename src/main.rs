use anyhow::Result;
use vindex_ui::AppServices;
use vindex_weather::{format_day_time, format_temperature, Coordinates, UnavailableLocationTracker};

fn parse_coordinates(args: &[String]) -> Result<Option<Coordinates>> {
    match args {
        [lat, lon, ..] => {
            let coords = Coordinates::new(lat.parse()?, lon.parse()?);
            anyhow::ensure!(coords.is_valid(), "coordinates out of range: {}", coords);
            Ok(Some(coords))
        }
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    vindex_core::init()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let watch = args.iter().any(|a| a == "--watch");
    let positional: Vec<String> = args.into_iter().filter(|a| !a.starts_with("--")).collect();
    let requested = parse_coordinates(&positional)?;

    let (config, _) = vindex_core::Config::load_validated()?;

    let services = AppServices::from_config(config).map_err(|e| {
        tracing::error!("{}", e);
        anyhow::anyhow!(e.user_message())
    })?;
    tracing::info!("Vindex started");

    let dashboard = services.dashboard(UnavailableLocationTracker::new());
    match requested {
        Some(coords) => {
            dashboard.update_location(coords).await;
        }
        None => {
            dashboard.trigger_sync().await;
        }
    }

    let state = dashboard.state();
    if let Some(error) = &state.error {
        eprintln!("Refresh failed: {} Showing cached data.", error);
    }

    let mut pages = dashboard.forecast().subscribe();
    let entries = pages.load_all()?;
    if entries.is_empty() {
        println!("No forecast cached for {}", dashboard.current_coordinates());
    } else {
        println!("{} ({})", entries[0].city_name, dashboard.current_coordinates());
        for entry in &entries {
            println!(
                "  {:<16} {:>8}  {:<12} {:>3}%  {:.1} m/s",
                format_day_time(entry.timestamp_seconds),
                format_temperature(entry.temp_current_celsius, state.unit),
                entry.condition_text,
                entry.humidity_percent,
                entry.wind_speed_mps,
            );
        }
    }

    if watch {
        let Some(scheduler) = services.start_scheduler(UnavailableLocationTracker::new()) else {
            anyhow::bail!("Background sync is disabled (sync.interval_hours = 0)");
        };
        tracing::info!("Background refresh running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        services.shutdown();
        scheduler.await?;
    }

    Ok(())
}
