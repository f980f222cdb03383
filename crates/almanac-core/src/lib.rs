pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod dayview;
pub mod event;
pub mod recurrence;
pub mod render;
pub mod session;
pub mod source;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting almanac CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.almanacrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let source =
    source::JsonlEventSource::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open events at {}",
        data_dir.display()
      )
    })?
    .with_min_query_len(
      cfg.search_min_length()?
    )
    .with_series_years(
      cfg.series_default_years()?
    );

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    source,
    &cfg,
    &mut renderer,
    inv
  )?;

  info!("done");
  Ok(())
}
