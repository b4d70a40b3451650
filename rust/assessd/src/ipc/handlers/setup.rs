use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::DateStyle;
use crate::store::LoadOptions;
use crate::subjectwise::Thresholds;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Reports,
    Analysis,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "analysis" => Some(Self::Analysis),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
            Self::Analysis => "setup.analysis",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "remarksLimit": 5,
            "metaBatchSize": 10,
            "trendDateStyle": "iso"
        }),
        SetupSection::Analysis => json!({
            "passThreshold": 35,
            "excellentMin": 80,
            "goodMin": 60
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "remarksLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "metaBatchSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 30)?));
                }
                "trendDateStyle" => {
                    let style = v
                        .as_str()
                        .and_then(DateStyle::parse)
                        .ok_or_else(|| "trendDateStyle must be one of: iso, us, eu".to_string())?;
                    obj.insert(k.clone(), Value::String(style.as_str().to_string()));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Analysis => match k.as_str() {
                "passThreshold" | "excellentMin" | "goodMin" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown analysis field: {}", k)),
            },
        }
    }
    if let SetupSection::Analysis = section {
        let good = obj.get("goodMin").and_then(|v| v.as_f64()).unwrap_or(60.0);
        let excellent = obj.get("excellentMin").and_then(|v| v.as_f64()).unwrap_or(80.0);
        if good > excellent {
            return Err("goodMin must not exceed excellentMin".into());
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), error = %msg, "ignoring stored setup");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct ReportSettings {
    pub load: LoadOptions,
    pub date_style: DateStyle,
}

pub fn report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    let defaults = LoadOptions::default();
    let as_usize = |key: &str, fallback: usize| {
        v.get(key)
            .and_then(|n| n.as_u64())
            .map(|n| n as usize)
            .unwrap_or(fallback)
    };
    Ok(ReportSettings {
        load: LoadOptions {
            meta_batch_size: as_usize("metaBatchSize", defaults.meta_batch_size),
            remarks_limit: as_usize("remarksLimit", defaults.remarks_limit),
        },
        date_style: v
            .get("trendDateStyle")
            .and_then(|s| s.as_str())
            .and_then(DateStyle::parse)
            .unwrap_or_default(),
    })
}

pub fn analysis_thresholds(conn: &rusqlite::Connection) -> anyhow::Result<Thresholds> {
    let v = load_section(conn, SetupSection::Analysis)?;
    let defaults = Thresholds::default();
    let num = |key: &str, fallback: f64| v.get(key).and_then(|n| n.as_f64()).unwrap_or(fallback);
    Ok(Thresholds {
        pass: num("passThreshold", defaults.pass),
        excellent_min: num("excellentMin", defaults.excellent_min),
        good_min: num("goodMin", defaults.good_min),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let analysis = match load_section(conn, SetupSection::Analysis) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "reports": reports,
            "analysis": analysis
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
