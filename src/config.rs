use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::pose::{FacingThresholds, LANDMARK_COUNT};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

/// Phase timers, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub hold_duration: f64,
    pub min_hold_duration: f64,
    pub transition_timeout: f64,
    pub holding_abandonment: f64,
    pub relaxation_threshold: f64,
    pub relaxation_ceiling: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            hold_duration: 2.0,
            min_hold_duration: 2.0,
            transition_timeout: 10.0,
            holding_abandonment: 5.0,
            relaxation_threshold: 5.0,
            relaxation_ceiling: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Matching {
    pub exit_threshold_multiplier: f32,
    pub relaxation_distance: f32,
    pub default_joint_threshold: f32,
    pub dtw_radius: usize,
    pub facing_threshold: f32,
}

impl Default for Matching {
    fn default() -> Self {
        Self {
            exit_threshold_multiplier: 0.8,
            relaxation_distance: 0.15,
            default_joint_threshold: 0.3,
            dtw_radius: 2,
            facing_threshold: 0.5,
        }
    }
}

impl Matching {
    pub fn facing(&self) -> FacingThresholds {
        FacingThresholds {
            x: self.facing_threshold,
            y: self.facing_threshold,
            z: self.facing_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransitionTuning {
    /// Landmark index followed along the reference trajectory.
    pub tracked_joint: usize,
    pub waypoint_tolerance_px: f32,
    pub good_coverage: f32,
    pub canvas_width: f32,
    pub canvas_height: f32,
}

impl Default for TransitionTuning {
    fn default() -> Self {
        Self {
            tracked_joint: 15,
            waypoint_tolerance_px: 40.0,
            good_coverage: 0.85,
            canvas_width: 640.0,
            canvas_height: 480.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Cues {
    pub cooldown_ms: u64,
}

impl Default for Cues {
    fn default() -> Self {
        Self { cooldown_ms: 1500 }
    }
}

/// Everything the session engine reads from a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tuning {
    pub timing: Timing,
    pub matching: Matching,
    pub transition: TransitionTuning,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub matching: Matching,
    #[serde(default)]
    pub transition: TransitionTuning,
    #[serde(default)]
    pub cues: Cues,

    // nested or dotted tables flatten into "a.b" -> "action"
    #[serde(default, deserialize_with = "deserialize_bindings_flat")]
    pub bindings: HashMap<String, String>,
}

impl Profile {
    pub fn tuning(&self) -> Tuning {
        Tuning {
            timing: self.timing,
            matching: self.matching,
            transition: self.transition,
        }
    }
}

fn deserialize_bindings_flat<'de, D>(
    de: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let table = match toml::Value::deserialize(de)? {
        toml::Value::Table(t) => t,
        other => {
            return Err(serde::de::Error::custom(format!(
                "bindings must be a table, got {}",
                other.type_str()
            )));
        }
    };

    let mut out = HashMap::new();
    flatten_table("", &table, &mut out).map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn flatten_table(
    prefix: &str,
    table: &toml::Table,
    out: &mut HashMap<String, String>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Table(sub) => flatten_table(&key, sub, out)?,
            other => {
                return Err(format!(
                    "binding '{key}' value must be a string, got {}",
                    other.type_str()
                ));
            }
        }
    }
    Ok(())
}

/// Parse and validate profile text; `origin` only labels error messages.
pub fn parse_profile(text: &str, origin: &Path) -> Result<Profile> {
    let profile: Profile =
        toml::from_str(text).map_err(|e| anyhow!("failed to parse {}: {e}", origin.display()))?;
    validate_profile(&profile).map_err(|e| anyhow!("{}: {e}", origin.display()))?;
    Ok(profile)
}

pub fn load_profile_file(path: &Path) -> Result<Profile> {
    let txt =
        fs::read_to_string(path).map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    parse_profile(&txt, path)
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

fn user_config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
    Ok(dirs.home_dir().join(".config").join("posecoach"))
}

/// On-disk profile collection plus the currently active profile.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

impl ProfileStore {
    pub fn load_or_install_default() -> Result<Self> {
        Self::open_in(user_config_dir()?)
    }

    /// Same as [`ProfileStore::load_or_install_default`] rooted at `config_dir`.
    pub fn open_in(config_dir: PathBuf) -> Result<Self> {
        let profiles_dir = config_dir.join("profiles");
        fs::create_dir_all(&profiles_dir)
            .map_err(|e| anyhow!("failed to create {}: {e}", profiles_dir.display()))?;

        let def_path = profiles_dir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = config_dir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile_file(&profiles_dir.join(format!("{active_name}.toml")))?;

        Ok(Self {
            active_name,
            profile,
            config_dir,
            profiles_dir,
            active_ptr,
        })
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    /// Re-read the active profile. On error the previous profile stays.
    pub fn reload(&mut self) -> Result<()> {
        match load_profile_file(&self.active_path()) {
            Ok(p) => {
                self.profile = p;
                Ok(())
            }
            Err(e) => {
                warn!("keeping last good profile '{}': {e}", self.active_name);
                Err(e)
            }
        }
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile_file(&p)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }
}

pub fn validate_profile(p: &Profile) -> Result<()> {
    let t = &p.timing;
    for (name, value) in [
        ("hold_duration", t.hold_duration),
        ("transition_timeout", t.transition_timeout),
        ("holding_abandonment", t.holding_abandonment),
        ("relaxation_threshold", t.relaxation_threshold),
        ("relaxation_ceiling", t.relaxation_ceiling),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(anyhow!("timing.{name} must be a positive duration"));
        }
    }
    if !(t.min_hold_duration.is_finite() && t.min_hold_duration >= 0.0) {
        return Err(anyhow!("timing.min_hold_duration must not be negative"));
    }

    let m = &p.matching;
    if !(m.exit_threshold_multiplier > 0.0 && m.exit_threshold_multiplier <= 2.0) {
        return Err(anyhow!("matching.exit_threshold_multiplier must be in (0,2]"));
    }
    if !(m.relaxation_distance > 0.0 && m.relaxation_distance.is_finite()) {
        return Err(anyhow!("matching.relaxation_distance must be positive"));
    }
    if !(m.default_joint_threshold > 0.0 && m.default_joint_threshold.is_finite()) {
        return Err(anyhow!("matching.default_joint_threshold must be positive"));
    }
    if !(0.0..=1.0).contains(&m.facing_threshold) {
        return Err(anyhow!("matching.facing_threshold must be in [0,1]"));
    }

    let tr = &p.transition;
    if tr.tracked_joint >= LANDMARK_COUNT {
        return Err(anyhow!(
            "transition.tracked_joint must be a landmark index below {LANDMARK_COUNT}"
        ));
    }
    if !(tr.good_coverage > 0.0 && tr.good_coverage <= 1.0) {
        return Err(anyhow!("transition.good_coverage must be in (0,1]"));
    }
    if tr.waypoint_tolerance_px <= 0.0 || tr.canvas_width <= 0.0 || tr.canvas_height <= 0.0 {
        return Err(anyhow!(
            "transition tolerance and canvas size must be positive pixel values"
        ));
    }

    for (k, v) in &p.bindings {
        if k.trim().is_empty() {
            return Err(anyhow!("empty binding key"));
        }
        let v = v.trim();
        if v.is_empty() {
            return Err(anyhow!("binding '{k}' has empty action"));
        }
        let ok = match v.strip_prefix("cue:") {
            Some(id) => !id.trim().is_empty(),
            None => v == "log" || v == "mute",
        };
        if !ok {
            return Err(anyhow!("binding '{k}' has invalid action '{v}'"));
        }
    }
    Ok(())
}
