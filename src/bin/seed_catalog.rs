#![forbid(unsafe_code)]

//! One-shot helper that fills an empty catalog with the platform's current
//! most-popular chart and registers the admin allow-list.

use anyhow::{Context, Result, anyhow, bail};
use std::{env, path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubeshelf::{
    catalog::{CatalogLocation, CatalogStore},
    config::{RuntimeOverrides, resolve_runtime_config},
    security::ensure_not_root,
    youtube::{MAX_CHART_RESULTS, MetadataProvider, YouTubeDataApi},
};

const DEFAULT_REGION: &str = "US";
const DEFAULT_COUNT: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SeedArgs {
    region: String,
    count: u32,
    superusers: Vec<String>,
    catalog_url: Option<String>,
    env_path: Option<PathBuf>,
}

impl SeedArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = SeedArgs {
            region: DEFAULT_REGION.to_string(),
            count: DEFAULT_COUNT,
            superusers: Vec::new(),
            catalog_url: None,
            env_path: None,
        };
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            let value = match inline_value {
                Some(value) => value,
                None if flag.starts_with("--") => args
                    .next()
                    .ok_or_else(|| anyhow!("{flag} requires a value"))?,
                None => bail!("unknown argument: {arg}"),
            };

            match flag.as_str() {
                "--region" => {
                    let region = value.trim().to_ascii_uppercase();
                    if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
                        bail!("--region expects a two-letter country code, got {value:?}");
                    }
                    parsed.region = region;
                }
                "--count" => {
                    let count: u32 = value
                        .parse()
                        .with_context(|| format!("--count expects a number, got {value:?}"))?;
                    if count == 0 {
                        bail!("--count must be at least 1");
                    }
                    parsed.count = count.min(MAX_CHART_RESULTS);
                }
                "--superuser" => {
                    let email = value.trim().to_string();
                    if !email.contains('@') {
                        bail!("--superuser expects an email address, got {value:?}");
                    }
                    parsed.superusers.push(email);
                }
                "--catalog" => parsed.catalog_url = Some(value),
                "--env-file" => parsed.env_path = Some(PathBuf::from(value)),
                _ => bail!("unknown argument: {arg}"),
            }
        }

        Ok(parsed)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SeedReport {
    videos: usize,
    superusers: usize,
}

async fn seed(
    catalog: &CatalogStore,
    metadata: Arc<dyn MetadataProvider>,
    args: &SeedArgs,
) -> Result<SeedReport> {
    let region = args.region.clone();
    let count = args.count;
    let chart = tokio::task::spawn_blocking(move || metadata.trending(&region, count))
        .await
        .context("chart request task failed")?
        .context("fetching most popular chart")?;

    let mut report = SeedReport::default();
    for video in &chart {
        catalog
            .set_title(&video.id, &video.title)
            .await
            .with_context(|| format!("storing {}", video.id))?;
        tracing::debug!(videoid = %video.id, title = %video.title, "seeded");
        report.videos += 1;
    }

    for email in &args.superusers {
        catalog
            .add_superuser(email)
            .await
            .with_context(|| format!("registering superuser {email}"))?;
        report.superusers += 1;
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tubeshelf=info,seed_catalog=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = SeedArgs::parse()?;
    ensure_not_root("seed_catalog")?;

    let config = resolve_runtime_config(RuntimeOverrides {
        catalog_url: args.catalog_url.clone(),
        env_path: args.env_path.clone(),
        ..RuntimeOverrides::default()
    })?;
    let location = CatalogLocation::parse(&config.catalog_url, config.catalog_auth_token.clone());
    let catalog = CatalogStore::open(&location)
        .await
        .context("opening catalog")?;
    let metadata = Arc::new(YouTubeDataApi::new(
        config.youtube_api_base.clone(),
        config.youtube_api_key.clone(),
    ));

    let report = seed(&catalog, metadata, &args).await?;
    tracing::info!(
        region = %args.region,
        videos = report.videos,
        superusers = report.superusers,
        "catalog seeded"
    );
    Ok(())
}
