use std::{
	path::PathBuf,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
};

use chromiumoxide::browser::{Browser, BrowserConfig};
use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::eyre};
use course_transcripts::{
	config::{AppConfig, SettingsFlags, Timing},
	driver::chromium::ChromiumDriver,
	login::{SessionStore, ensure_logged_in},
	orchestrator::{ChannelObserver, Orchestrator, RunEvent},
	output::{COMPLETE_FILE, MarkdownWriter, merge_sections},
	selectors::SelectorTable,
};
use futures::StreamExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use v_utils::{elog, log};

#[derive(Debug, Parser)]
#[command(name = "course_transcripts")]
#[command(about = "Collects lecture transcripts from an enrolled online course", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Log in, find the course by name and save every available transcript
	Scrape {
		/// Course name as shown on "My learning" (approximate matches are fine)
		course: String,
		#[command(flatten)]
		settings: SettingsFlags,
	},
	/// Rebuild the per-section documents and the complete-course document from already saved lecture files
	Merge {
		/// Course directory containing the Section_NN folders
		dir: PathBuf,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	let cli = Cli::parse();

	match cli.command {
		Command::Merge { dir } => {
			let merged = merge_sections(&dir)?;
			log!("Rebuilt {} section documents and {} in {}", merged, COMPLETE_FILE, dir.display());
			Ok(())
		}
		Command::Scrape { course, settings } => {
			let config = AppConfig::try_build(settings).map_err(|e| eyre!("Failed to load config: {}", e))?;
			init_tracing(&config)?;
			let productive = scrape(&config, &course).await;
			let message = match &productive {
				Ok(true) => format!("Finished scraping \"{course}\""),
				Ok(false) => format!("Scraping \"{course}\" produced no transcripts"),
				Err(e) => format!("Scraping \"{course}\" failed: {e}"),
			};
			run_stop_hook(&config, &message);
			if !productive? {
				elog!("{}", message);
				std::process::exit(1);
			}
			Ok(())
		}
	}
}

/// File-only diagnostics, so the console carries nothing but the narration
fn init_tracing(config: &AppConfig) -> Result<()> {
	std::fs::create_dir_all(&config.output_dir).map_err(|e| eyre!("Failed to create output dir {}: {}", config.output_dir, e))?;
	let log_path = PathBuf::from(&config.output_dir).join("scrape.log");
	let file = std::fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open(&log_path)
		.map_err(|e| eyre!("Failed to open log file {}: {}", log_path.display(), e))?;

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
		.try_init()
		.map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))
}

/// Run the stop hook with a message if configured
fn run_stop_hook(config: &AppConfig, message: &str) {
	if let Some(ref hook) = config.stop_hook {
		log!("Running stop hook: {} {:?}", hook, message);
		// Escape single quotes for shell: replace ' with '\''
		let escaped = message.replace('\'', "'\\''");
		let _ = tokio::process::Command::new("sh").arg("-c").arg(format!("{} '{}'", hook, escaped)).spawn();
	}
}

async fn scrape(config: &AppConfig, course: &str) -> Result<bool> {
	let selectors = match &config.selectors_file {
		Some(path) => SelectorTable::load(path)?,
		None => SelectorTable::default(),
	};
	let timing = Timing::try_from(config)?;

	let (mut browser, mut handler) = match config.debug_port {
		Some(port) => {
			let url = format!("http://127.0.0.1:{port}");
			log!("Attaching to browser at {}", url);
			Browser::connect(&url).await.map_err(|e| eyre!("Failed to connect to browser at {}: {}", url, e))?
		}
		None => {
			let browser_config = if config.visible {
				BrowserConfig::builder().with_head().build()
			} else {
				BrowserConfig::builder().build()
			}
			.map_err(|e| eyre!("Failed to build browser config: {}", e))?;
			Browser::launch(browser_config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?
		}
	};
	// Browser events must be drained or the connection stalls
	let handle = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

	let page = browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {}", e))?;
	let driver = ChromiumDriver::new(page);

	let outcome = drive(config, &driver, &selectors, &timing, course).await;

	drop(driver);
	if config.debug_port.is_none() {
		if let Err(e) = browser.close().await {
			tracing::warn!("Failed to close browser: {e}");
		}
	}
	handle.abort();
	outcome
}

async fn drive(config: &AppConfig, driver: &ChromiumDriver, selectors: &SelectorTable, timing: &Timing, course: &str) -> Result<bool> {
	let store = SessionStore::new(&config.session_file);
	ensure_logged_in(driver, selectors, timing, config, &store).await?;

	let cancel = Arc::new(AtomicBool::new(false));
	{
		let cancel = Arc::clone(&cancel);
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				elog!("Interrupted, stopping after the current lecture");
				cancel.store(true, Ordering::Relaxed);
			}
		});
	}

	let (observer, mut events) = ChannelObserver::new();
	let printer = tokio::spawn(async move {
		while let Some(event) = events.recv().await {
			match event {
				RunEvent::Progress { current, total } => tracing::info!("progress {current}/{total}"),
				RunEvent::Status(line) => log!("{}", line),
				RunEvent::Log(line) => log!("  {}", line),
			}
		}
	});

	let writer = MarkdownWriter::new(&config.output_dir);
	let productive = {
		let mut orchestrator = Orchestrator::new(driver, selectors, timing, &observer, &writer)
			.with_base_url(&config.base_url)
			.with_cancel(cancel)
			.with_snapshots(config.save_failed_pages);
		let productive = orchestrator.run(course).await;
		log!("{}", orchestrator.run_summary());
		if let Some(course) = orchestrator.course() {
			log!("Transcripts saved to {}", writer.course_dir(&course.title).display());
		}
		productive
	};

	// closing the channel lets the printer finish the backlog
	drop(observer);
	let _ = printer.await;
	Ok(productive)
}
