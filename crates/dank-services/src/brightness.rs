//! Brightness manager over sysfs `backlight` and `leds` classes.
//!
//! Exposes `brightness.*` methods and two streams: full state on every
//! change (`brightness`) and the device just adjusted (`brightness.update`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dank_protocol::{HandlerError, HandlerResult, Methods, Params, Services};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::params::{int_param, opt_bool_param, opt_f64_param, opt_int_param, str_param};
use crate::{AuxStream, Manager, ManagerError, Subscribers};

pub const DEFAULT_EXPONENT: f64 = 1.2;
const DEFAULT_STEP: i64 = 10;

/// LED names that are indicators rather than dimmable lights.
const SUPPRESSED_SUFFIXES: &[&str] = &[
    "::lan",
    "::scrolllock",
    "::capslock",
    "::numlock",
    "::kana",
    "::compose",
];

const AUX_STREAMS: &[AuxStream] = &[AuxStream {
    name: Services::BRIGHTNESS_UPDATE,
    implied: true,
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Backlight,
    Leds,
}

impl DeviceClass {
    const ALL: [DeviceClass; 2] = [DeviceClass::Backlight, DeviceClass::Leds];

    fn dir_name(self) -> &'static str {
        match self {
            Self::Backlight => "backlight",
            Self::Leds => "leds",
        }
    }

    /// Lowest value a write may use. Backlights never go fully dark.
    fn min_value(self) -> i64 {
        match self {
            Self::Backlight => 1,
            Self::Leds => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub class: DeviceClass,
    pub id: String,
    pub name: String,
    pub current: i64,
    pub max: i64,
    pub current_percent: i64,
    pub backend: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BrightnessState {
    pub devices: Vec<Device>,
}

/// How a percent maps onto the hardware range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    Linear,
    Exponential(f64),
}

impl Curve {
    fn from_params(exponential: bool, exponent: f64) -> Self {
        if exponential {
            Self::Exponential(exponent)
        } else {
            Self::Linear
        }
    }
}

#[derive(Debug, Clone)]
struct SysfsDevice {
    class: DeviceClass,
    name: String,
    max: i64,
    min: i64,
}

impl SysfsDevice {
    fn brightness_path(&self, root: &Path) -> PathBuf {
        root.join(self.class.dir_name()).join(&self.name).join("brightness")
    }

    fn percent_to_value(&self, percent: i64, curve: Curve) -> i64 {
        if percent == 0 {
            return self.min;
        }
        let range = self.max - self.min;
        let value = match curve {
            Curve::Exponential(exponent) => {
                let hardware = (percent as f64 / 100.0).powf(exponent);
                self.min + (hardware * range as f64).round() as i64
            }
            Curve::Linear => self.min + (percent - 1) * range / 99,
        };
        value.clamp(self.min, self.max)
    }

    fn value_to_percent(&self, value: i64, curve: Curve) -> i64 {
        if value <= self.min {
            return if self.min == 0 && value == 0 { 0 } else { 1 };
        }
        let range = self.max - self.min;
        if range == 0 {
            return 100;
        }
        let percent = match curve {
            Curve::Exponential(exponent) => {
                let hardware = (value - self.min) as f64 / range as f64;
                (hardware.powf(1.0 / exponent) * 100.0).round() as i64
            }
            Curve::Linear => 1 + (value - self.min) * 99 / range,
        };
        percent.clamp(1, 100)
    }
}

fn read_int(path: &Path) -> Option<i64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_suppressed(name: &str) -> bool {
    SUPPRESSED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

pub struct BrightnessManager {
    /// sysfs class root, normally `/sys/class`
    root: PathBuf,
    devices: RwLock<HashMap<String, SysfsDevice>>,
    state: RwLock<BrightnessState>,
    subscribers: Subscribers<Value>,
    updates: Subscribers<Value>,
}

impl BrightnessManager {
    /// Scan `<root>/backlight` and `<root>/leds`. Fails only when neither
    /// class directory can be read.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let root = root.into();
        let devices = scan_devices(&root)?;
        info!("Brightness manager found {} device(s)", devices.len());

        let manager = Self {
            root,
            devices: RwLock::new(devices),
            state: RwLock::new(BrightnessState::default()),
            subscribers: Subscribers::new(),
            updates: Subscribers::new(),
        };
        manager.refresh(None);
        Ok(manager)
    }

    pub fn snapshot(&self) -> BrightnessState {
        self.state.read().clone()
    }

    /// Re-read every device. Pushes state only if something changed.
    /// `pinned` keeps a just-requested percent for one device, so repeated
    /// steps accumulate even when the hardware range is coarse.
    fn refresh(&self, pinned: Option<(&str, i64)>) -> bool {
        let mut devices: Vec<Device> = {
            let cache = self.devices.read();
            cache
                .iter()
                .filter(|(_, dev)| !is_suppressed(&dev.name))
                .filter_map(|(id, dev)| {
                    let current = read_int(&dev.brightness_path(&self.root))?;
                    Some(Device {
                        class: dev.class,
                        id: id.clone(),
                        name: dev.name.clone(),
                        current,
                        max: dev.max,
                        current_percent: dev.value_to_percent(current, Curve::Linear),
                        backend: "sysfs",
                    })
                })
                .collect()
        };
        if let Some((id, percent)) = pinned {
            if let Some(device) = devices.iter_mut().find(|d| d.id == id) {
                device.current_percent = percent;
            }
        }
        devices.sort_by(|a, b| a.class.cmp(&b.class).then_with(|| a.name.cmp(&b.name)));

        let new_state = BrightnessState { devices };
        {
            let mut state = self.state.write();
            if *state == new_state {
                return false;
            }
            *state = new_state;
        }
        debug!("Brightness state changed, notifying subscribers");
        self.subscribers.notify(self.state());
        true
    }

    pub async fn rescan(&self) -> Result<(), ManagerError> {
        debug!("Rescanning brightness devices");
        let root = self.root.clone();
        let devices = tokio::task::spawn_blocking(move || scan_devices(&root)).await??;
        *self.devices.write() = devices;
        self.refresh(None);
        Ok(())
    }

    pub fn set_brightness(&self, id: &str, percent: i64, curve: Curve) -> Result<(), HandlerError> {
        if !(0..=100).contains(&percent) {
            return Err(HandlerError::failed(format!("percent out of range: {percent}")));
        }
        let device = self
            .devices
            .read()
            .get(id)
            .filter(|dev| !is_suppressed(&dev.name))
            .cloned()
            .ok_or_else(|| HandlerError::failed(format!("device not found: {id}")))?;

        let value = device.percent_to_value(percent, curve);
        let path = device.brightness_path(&self.root);
        if let Err(e) = std::fs::write(&path, value.to_string()) {
            self.refresh(None);
            return Err(HandlerError::failed(format!(
                "failed to set brightness: write brightness: {e}"
            )));
        }
        debug!("Set {id} to {percent}% ({value}/{})", device.max);

        self.refresh(Some((id, percent)));
        self.publish_update(id);
        Ok(())
    }

    pub fn increment(&self, id: &str, step: i64, curve: Curve) -> Result<(), HandlerError> {
        let current = self
            .state
            .read()
            .devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.current_percent)
            .ok_or_else(|| HandlerError::failed(format!("device not found: {id}")))?;

        self.set_brightness(id, current.saturating_add(step).clamp(0, 100), curve)
    }

    fn publish_update(&self, id: &str) {
        let device = self.state.read().devices.iter().find(|d| d.id == id).cloned();
        if let Some(device) = device {
            self.updates.notify(json!({ "device": device }));
        }
    }
}

fn scan_devices(root: &Path) -> Result<HashMap<String, SysfsDevice>, ManagerError> {
    let mut devices = HashMap::new();
    let mut readable = 0;

    for class in DeviceClass::ALL {
        let class_dir = root.join(class.dir_name());
        let entries = match std::fs::read_dir(&class_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ManagerError::io(&class_dir, e)),
        };
        readable += 1;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(max) = read_int(&path.join("max_brightness")).filter(|max| *max > 0) else {
                debug!("Skip {}/{name}: no usable max_brightness", class.dir_name());
                continue;
            };
            let id = format!("{}:{name}", class.dir_name());
            debug!("Found {id} (max={max})");
            devices.insert(
                id,
                SysfsDevice {
                    class,
                    name,
                    max,
                    min: class.min_value(),
                },
            );
        }
    }

    if readable == 0 {
        return Err(ManagerError::Unavailable(format!(
            "sysfs brightness under {}",
            root.display()
        )));
    }
    Ok(devices)
}

fn curve_params(params: &Params) -> Result<Curve, HandlerError> {
    let exponential = opt_bool_param(params, "exponential")?.unwrap_or(false);
    let exponent = opt_f64_param(params, "exponent")?.unwrap_or(DEFAULT_EXPONENT);
    if exponent <= 0.0 {
        return Err(HandlerError::invalid_param("exponent"));
    }
    Ok(Curve::from_params(exponential, exponent))
}

impl Manager for BrightnessManager {
    fn capability(&self) -> &'static str {
        Services::BRIGHTNESS
    }

    async fn handle(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            Methods::BRIGHTNESS_GET_STATE => {}
            Methods::BRIGHTNESS_SET => {
                let device = str_param(&params, "device")?;
                let percent = int_param(&params, "percent")?;
                self.set_brightness(device, percent, curve_params(&params)?)?;
            }
            Methods::BRIGHTNESS_INCREMENT | Methods::BRIGHTNESS_DECREMENT => {
                let device = str_param(&params, "device")?;
                let mut step = opt_int_param(&params, "step")?.unwrap_or(DEFAULT_STEP);
                if method == Methods::BRIGHTNESS_DECREMENT {
                    step = step.saturating_neg();
                }
                self.increment(device, step, curve_params(&params)?)?;
            }
            Methods::BRIGHTNESS_RESCAN => {
                self.rescan().await.map_err(|e| HandlerError::context("rescan", e))?;
            }
            _ => return Err(HandlerError::unknown_method(method)),
        }
        Ok(self.state())
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    fn subscribe(&self, id: &str) -> broadcast::Receiver<Value> {
        self.subscribers.subscribe(id)
    }

    fn unsubscribe(&self, id: &str) {
        self.subscribers.unsubscribe(id);
    }

    fn aux_streams(&self) -> &'static [AuxStream] {
        AUX_STREAMS
    }

    fn subscribe_aux(&self, stream: &str, id: &str) -> Option<broadcast::Receiver<Value>> {
        (stream == Services::BRIGHTNESS_UPDATE).then(|| self.updates.subscribe(id))
    }

    fn unsubscribe_aux(&self, stream: &str, id: &str) {
        if stream == Services::BRIGHTNESS_UPDATE {
            self.updates.unsubscribe(id);
        }
    }

    async fn close(&self) {
        self.subscribers.clear();
        self.updates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_device(root: &Path, class: &str, name: &str, current: i64, max: i64) {
        let dir = root.join(class).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("brightness"), format!("{current}\n")).unwrap();
        std::fs::write(dir.join("max_brightness"), format!("{max}\n")).unwrap();
    }

    fn read_brightness(root: &Path, class: &str, name: &str) -> i64 {
        read_int(&root.join(class).join(name).join("brightness")).unwrap()
    }

    fn fixture() -> (TempDir, BrightnessManager) {
        let dir = tempfile::tempdir().unwrap();
        add_device(dir.path(), "backlight", "intel_backlight", 50, 100);
        add_device(dir.path(), "leds", "tpacpi::kbd_backlight", 1, 2);
        add_device(dir.path(), "leds", "input3::capslock", 0, 1);
        add_device(dir.path(), "leds", "broken", 0, 0);
        let manager = BrightnessManager::new(dir.path()).unwrap();
        (dir, manager)
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn backlight(min: i64, max: i64) -> SysfsDevice {
        SysfsDevice {
            class: DeviceClass::Backlight,
            name: "b".into(),
            max,
            min,
        }
    }

    #[test]
    fn linear_mapping() {
        let dev = backlight(1, 100);
        assert_eq!(dev.percent_to_value(0, Curve::Linear), 1);
        assert_eq!(dev.percent_to_value(1, Curve::Linear), 1);
        assert_eq!(dev.percent_to_value(50, Curve::Linear), 50);
        assert_eq!(dev.percent_to_value(100, Curve::Linear), 100);

        assert_eq!(dev.value_to_percent(1, Curve::Linear), 1);
        assert_eq!(dev.value_to_percent(100, Curve::Linear), 100);
    }

    #[test]
    fn led_zero_maps_to_zero_percent() {
        let dev = SysfsDevice {
            class: DeviceClass::Leds,
            name: "kbd".into(),
            max: 2,
            min: 0,
        };
        assert_eq!(dev.value_to_percent(0, Curve::Linear), 0);
        assert_eq!(dev.percent_to_value(0, Curve::Linear), 0);
        assert_eq!(dev.percent_to_value(100, Curve::Linear), 2);
    }

    #[test]
    fn exponential_mapping_is_clamped() {
        let dev = backlight(1, 1000);
        let value = dev.percent_to_value(50, Curve::Exponential(2.0));
        assert_eq!(value, 1 + (0.25_f64 * 999.0).round() as i64);
        assert_eq!(dev.percent_to_value(100, Curve::Exponential(2.0)), 1000);
        assert_eq!(dev.value_to_percent(1000, Curve::Exponential(2.0)), 100);
    }

    #[test]
    fn zero_range_reports_full() {
        let dev = backlight(1, 1);
        assert_eq!(dev.value_to_percent(1, Curve::Linear), 1);
        let dev = backlight(0, 0);
        assert_eq!(dev.value_to_percent(5, Curve::Linear), 100);
    }

    #[test]
    fn scan_skips_indicators_and_invalid_devices() {
        let (_dir, manager) = fixture();
        let ids: Vec<String> = manager.snapshot().devices.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["backlight:intel_backlight", "leds:tpacpi::kbd_backlight"]);
    }

    #[test]
    fn missing_sysfs_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BrightnessManager::new(dir.path()),
            Err(ManagerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn set_writes_value_and_returns_state() {
        let (dir, manager) = fixture();
        let result = manager
            .handle(
                Methods::BRIGHTNESS_SET,
                params(json!({"device": "backlight:intel_backlight", "percent": 80})),
            )
            .await
            .unwrap();

        assert_eq!(read_brightness(dir.path(), "backlight", "intel_backlight"), 80);
        assert_eq!(result["devices"][0]["current"], 80);
        assert_eq!(result["devices"][0]["currentPercent"], 80);
    }

    #[tokio::test]
    async fn increment_and_decrement_use_default_step() {
        let (dir, manager) = fixture();
        let device = json!({"device": "backlight:intel_backlight"});

        manager.handle(Methods::BRIGHTNESS_INCREMENT, params(device.clone())).await.unwrap();
        assert_eq!(read_brightness(dir.path(), "backlight", "intel_backlight"), 60);

        manager
            .handle(Methods::BRIGHTNESS_DECREMENT, params(json!({"device": "backlight:intel_backlight", "step": 25})))
            .await
            .unwrap();
        assert_eq!(read_brightness(dir.path(), "backlight", "intel_backlight"), 35);
    }

    #[tokio::test]
    async fn extreme_steps_clamp_to_range() {
        let (dir, manager) = fixture();

        let state = manager
            .handle(Methods::BRIGHTNESS_INCREMENT, params(json!({"device": "backlight:intel_backlight", "step": i64::MAX})))
            .await
            .unwrap();
        assert_eq!(state["devices"][0]["currentPercent"], 100);
        assert_eq!(read_brightness(dir.path(), "backlight", "intel_backlight"), 100);

        let state = manager
            .handle(Methods::BRIGHTNESS_DECREMENT, params(json!({"device": "backlight:intel_backlight", "step": i64::MIN})))
            .await
            .unwrap();
        assert_eq!(state["devices"][0]["currentPercent"], 100);

        let state = manager
            .handle(Methods::BRIGHTNESS_INCREMENT, params(json!({"device": "backlight:intel_backlight", "step": i64::MIN})))
            .await
            .unwrap();
        assert_eq!(state["devices"][0]["currentPercent"], 0);
        assert_eq!(read_brightness(dir.path(), "backlight", "intel_backlight"), 1);
    }

    #[tokio::test]
    async fn steps_accumulate_on_coarse_devices() {
        let (dir, manager) = fixture();
        let led = json!({"device": "leds:tpacpi::kbd_backlight"});
        manager.handle(Methods::BRIGHTNESS_SET, params(json!({"device": "leds:tpacpi::kbd_backlight", "percent": 0}))).await.unwrap();

        let state = manager.handle(Methods::BRIGHTNESS_INCREMENT, params(led.clone())).await.unwrap();
        assert_eq!(state["devices"][1]["currentPercent"], 10);
        let state = manager.handle(Methods::BRIGHTNESS_INCREMENT, params(led)).await.unwrap();
        assert_eq!(state["devices"][1]["currentPercent"], 20);
        assert_eq!(read_brightness(dir.path(), "leds", "tpacpi::kbd_backlight"), 0);
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let (_dir, manager) = fixture();

        let err = manager.handle(Methods::BRIGHTNESS_SET, params(json!({"percent": 5}))).await.unwrap_err();
        assert_eq!(err.to_string(), "missing or invalid device parameter");

        let err = manager
            .handle(Methods::BRIGHTNESS_SET, params(json!({"device": "backlight:nope", "percent": 5})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "device not found: backlight:nope");

        let err = manager
            .handle(Methods::BRIGHTNESS_SET, params(json!({"device": "backlight:intel_backlight", "percent": 101})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "percent out of range: 101");

        let err = manager.handle("brightness.bogus", Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown method: brightness.bogus");
    }

    #[tokio::test]
    async fn changes_reach_both_streams() {
        let (_dir, manager) = fixture();
        let mut state_rx = manager.subscribe("s");
        let mut update_rx = manager.subscribe_aux(Services::BRIGHTNESS_UPDATE, "s").unwrap();

        manager.set_brightness("backlight:intel_backlight", 30, Curve::Linear).unwrap();

        let state = state_rx.recv().await.unwrap();
        assert_eq!(state["devices"][0]["current"], 30);
        let update = update_rx.recv().await.unwrap();
        assert_eq!(update["device"]["id"], "backlight:intel_backlight");

        manager.unsubscribe("s");
        manager.unsubscribe_aux(Services::BRIGHTNESS_UPDATE, "s");
        assert!(state_rx.recv().await.is_err());
        assert!(update_rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn unchanged_rescan_pushes_nothing() {
        let (dir, manager) = fixture();
        let mut rx = manager.subscribe("s");

        manager.handle(Methods::BRIGHTNESS_RESCAN, Params::new()).await.unwrap();
        assert!(rx.try_recv().is_err());

        add_device(dir.path(), "backlight", "acpi_video0", 3, 10);
        manager.handle(Methods::BRIGHTNESS_RESCAN, Params::new()).await.unwrap();
        let state = rx.recv().await.unwrap();
        assert_eq!(state["devices"].as_array().unwrap().len(), 3);
    }
}
