//! Method name constants, grouped by namespace.
//!
//! Each constant is the exact string sent as the `method` field of a request.
//! Namespaced methods are owned by their manager; the server only routes them.

/// All method names the daemon answers, grouped by namespace.
pub struct Methods;

impl Methods {
    // ── Built-ins ───────────────────────────────────────────────────────
    pub const PING: &str = "ping";
    pub const GET_SERVER_INFO: &str = "getServerInfo";
    pub const SUBSCRIBE: &str = "subscribe";

    // ── Brightness ──────────────────────────────────────────────────────
    pub const BRIGHTNESS_GET_STATE: &str = "brightness.getState";
    pub const BRIGHTNESS_SET: &str = "brightness.setBrightness";
    pub const BRIGHTNESS_INCREMENT: &str = "brightness.increment";
    pub const BRIGHTNESS_DECREMENT: &str = "brightness.decrement";
    pub const BRIGHTNESS_RESCAN: &str = "brightness.rescan";
    pub const BRIGHTNESS_SUBSCRIBE: &str = "brightness.subscribe";

    // ── Network ─────────────────────────────────────────────────────────
    pub const NETWORK_GET_STATE: &str = "network.getState";
    pub const NETWORK_INFO: &str = "network.info";
    pub const NETWORK_SUBSCRIBE: &str = "network.subscribe";

    // ── CUPS ────────────────────────────────────────────────────────────
    pub const CUPS_GET_PRINTERS: &str = "cups.getPrinters";
    pub const CUPS_GET_JOBS: &str = "cups.getJobs";
    pub const CUPS_PAUSE_PRINTER: &str = "cups.pausePrinter";
    pub const CUPS_RESUME_PRINTER: &str = "cups.resumePrinter";
    pub const CUPS_CANCEL_JOB: &str = "cups.cancelJob";
    pub const CUPS_PURGE_JOBS: &str = "cups.purgeJobs";

    // ── Plugins ─────────────────────────────────────────────────────────
    pub const PLUGINS_LIST: &str = "plugins.list";
    pub const PLUGINS_LIST_INSTALLED: &str = "plugins.listInstalled";
    pub const PLUGINS_INSTALL: &str = "plugins.install";
    pub const PLUGINS_UNINSTALL: &str = "plugins.uninstall";
    pub const PLUGINS_UPDATE: &str = "plugins.update";
    pub const PLUGINS_SEARCH: &str = "plugins.search";
}

/// Suffix that turns a namespace into its streaming subscribe method.
pub const SUBSCRIBE_SUFFIX: &str = "subscribe";

/// `(method, description)` pairs for the built-ins and the in-tree managers.
pub const METHOD_DOCS: &[(&str, &str)] = &[
    (Methods::PING, "Test connection"),
    (Methods::GET_SERVER_INFO, "Get server info (API version and capabilities)"),
    (Methods::SUBSCRIBE, "Subscribe to multiple services (params: services [default: all])"),
    (Methods::PLUGINS_LIST_INSTALLED, "List installed plugins"),
    (Methods::PLUGINS_UNINSTALL, "Uninstall plugin (params: name)"),
    (Methods::NETWORK_GET_STATE, "Get current network state"),
    (Methods::NETWORK_INFO, "Get interface details (params: interface)"),
    (Methods::NETWORK_SUBSCRIBE, "Subscribe to network state changes (streaming)"),
    (Methods::CUPS_GET_PRINTERS, "Get printers list"),
    (Methods::CUPS_GET_JOBS, "Get non-completed jobs list (params: printerName)"),
    (Methods::CUPS_PAUSE_PRINTER, "Pause printer (params: printerName)"),
    (Methods::CUPS_RESUME_PRINTER, "Resume printer (params: printerName)"),
    (Methods::CUPS_CANCEL_JOB, "Cancel job (params: printerName, jobID)"),
    (Methods::CUPS_PURGE_JOBS, "Cancel all jobs (params: printerName)"),
    (Methods::BRIGHTNESS_GET_STATE, "Get current brightness state for all devices"),
    (Methods::BRIGHTNESS_SET, "Set device brightness (params: device, percent)"),
    (Methods::BRIGHTNESS_INCREMENT, "Increment device brightness (params: device, step?)"),
    (Methods::BRIGHTNESS_DECREMENT, "Decrement device brightness (params: device, step?)"),
    (Methods::BRIGHTNESS_RESCAN, "Rescan for brightness devices"),
    (Methods::BRIGHTNESS_SUBSCRIBE, "Subscribe to brightness state changes (streaming)"),
];
