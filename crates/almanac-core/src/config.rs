use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::recurrence::DEFAULT_SERIES_YEARS;
use crate::session::DEFAULT_DEBOUNCE;
use crate::source::MIN_QUERY_LEN;

const ALMANACRC_ENV_VAR: &str =
  "ALMANACRC";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in defaults only; no rc file
  /// is read.
  pub fn defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    for (key, value) in [
      (
        "data.location",
        "~/.almanac".to_string()
      ),
      (
        "default.command",
        "day".to_string()
      ),
      ("color", "on".to_string()),
      (
        "render.style",
        "arrow".to_string()
      ),
      (
        "search.min_length",
        MIN_QUERY_LEN.to_string()
      ),
      (
        "search.debounce_ms",
        DEFAULT_DEBOUNCE
          .as_millis()
          .to_string()
      ),
      (
        "series.default_years",
        DEFAULT_SERIES_YEARS.to_string()
      )
    ] {
      cfg
        .map
        .insert(key.to_string(), value);
    }

    cfg
  }

  #[tracing::instrument(skip(
    almanacrc_override
  ))]
  pub fn load(
    almanacrc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let almanacrc =
      resolve_almanacrc_path(
        almanacrc_override
      )?;
    if let Some(path) = almanacrc {
      info!(almanacrc = %path.display(), "loading almanacrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no almanacrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Typed lookup; a present but
  /// unparseable value is an error
  /// rather than a silent default.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|err| {
        anyhow!(
          "invalid value for {key}: \
           {raw} ({err})"
        )
      })
  }

  pub fn search_min_length(
    &self
  ) -> anyhow::Result<usize> {
    Ok(
      self
        .get_parsed::<usize>(
          "search.min_length"
        )?
        .unwrap_or(MIN_QUERY_LEN)
    )
  }

  pub fn search_debounce(
    &self
  ) -> anyhow::Result<Duration> {
    Ok(
      self
        .get_parsed::<u64>(
          "search.debounce_ms"
        )?
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_DEBOUNCE)
    )
  }

  pub fn series_default_years(
    &self
  ) -> anyhow::Result<i32> {
    Ok(
      self
        .get_parsed::<i32>(
          "series.default_years"
        )?
        .unwrap_or(DEFAULT_SERIES_YEARS)
    )
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_almanacrc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(ALMANACRC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping almanacrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".almanacrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".almanac"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use super::Config;

  #[test]
  fn defaults_cover_every_tunable() {
    let cfg = Config::defaults();
    assert_eq!(
      cfg.get("default.command")
        .as_deref(),
      Some("day")
    );
    assert_eq!(
      cfg
        .search_min_length()
        .expect("min length"),
      2
    );
    assert_eq!(
      cfg
        .search_debounce()
        .expect("debounce"),
      Duration::from_millis(300)
    );
    assert_eq!(
      cfg
        .series_default_years()
        .expect("years"),
      2
    );
  }

  #[test]
  fn rc_file_with_include_and_overrides(
  ) {
    let temp = tempfile::tempdir()
      .expect("tempdir");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &extra,
      "render.style = compact\n"
    )
    .expect("write include");
    let main =
      temp.path().join("almanacrc");
    fs::write(
      &main,
      "# local settings\ncolor = off \
       # no ansi\ninclude extra.rc\n\
       search.min_length = 3\n"
    )
    .expect("write rc");

    let mut cfg =
      Config::load(Some(&main))
        .expect("load rc");
    assert_eq!(
      cfg.loaded_files.len(),
      2
    );
    assert_eq!(
      cfg.get("color").as_deref(),
      Some("off")
    );
    assert_eq!(
      cfg
        .get("render.style")
        .as_deref(),
      Some("compact")
    );
    assert_eq!(
      cfg
        .search_min_length()
        .expect("min length"),
      3
    );

    cfg.apply_overrides(vec![(
      "rc.search.min_length"
        .to_string(),
      "4".to_string()
    )]);
    assert_eq!(
      cfg
        .search_min_length()
        .expect("min length"),
      4
    );
  }

  #[test]
  fn bad_numeric_value_is_an_error() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![(
      "search.debounce_ms".to_string(),
      "soon".to_string()
    )]);
    assert!(
      cfg.search_debounce().is_err()
    );
    assert_eq!(
      cfg
        .series_default_years()
        .expect("years"),
      2
    );
  }

  #[test]
  fn malformed_line_is_rejected() {
    let temp = tempfile::tempdir()
      .expect("tempdir");
    let main =
      temp.path().join("almanacrc");
    fs::write(&main, "just words\n")
      .expect("write rc");
    assert!(
      Config::load(Some(&main)).is_err()
    );
  }
}
