use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    page_size: Option<usize>,
    reservation_granularity: Option<usize>,
    systematic_base: Option<usize>,
    systematic_retries: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    page_size: usize,
    page_shift: u32,
    reservation_granularity: usize,
    systematic_base: usize,
    systematic_retries: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let page_size = cfg.page_size.unwrap_or(4096);
    assert!(
        page_size > 0 && page_size.is_power_of_two(),
        "page_size ({}) must be a power of 2",
        page_size
    );
    assert!(
        page_size >= 4096,
        "page_size ({}) must be >= 4096",
        page_size
    );

    let reservation_granularity = cfg.reservation_granularity.unwrap_or(64 * 1024);
    assert!(
        reservation_granularity.is_power_of_two(),
        "reservation_granularity ({}) must be a power of 2",
        reservation_granularity
    );
    assert!(
        reservation_granularity >= page_size,
        "reservation_granularity ({}) must be >= page_size ({})",
        reservation_granularity,
        page_size
    );

    let systematic_base = cfg.systematic_base.unwrap_or(0x4000_0000_0000);
    assert!(systematic_base > 0, "systematic_base must be > 0");
    assert!(
        systematic_base % reservation_granularity == 0,
        "systematic_base ({:#x}) must be a multiple of reservation_granularity ({})",
        systematic_base,
        reservation_granularity
    );

    let systematic_retries = cfg.systematic_retries.unwrap_or(1000);
    assert!(systematic_retries > 0, "systematic_retries must be > 0");

    ResolvedConfig {
        page_size,
        page_shift: page_size.trailing_zeros(),
        reservation_granularity,
        systematic_base,
        systematic_retries,
    }
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const RESERVATION_GRANULARITY: usize = {};\n\
         pub const SYSTEMATIC_BASE: usize = {:#x};\n\
         pub const SYSTEMATIC_RETRIES: usize = {};\n",
        cfg.page_shift,
        cfg.page_size,
        cfg.reservation_granularity,
        cfg.systematic_base,
        cfg.systematic_retries,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/rtpal.toml", manifest_dir)
}

fn main() {
    println!("cargo:rerun-if-env-changed=RTPAL_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("RTPAL_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve_config(&config.config);
    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
