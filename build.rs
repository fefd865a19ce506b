/// Set, when a logging backend was selected.
const LOGGING_ENABLED: &str = "logging_enabled";

fn main() {
    println!("cargo:rustc-check-cfg=cfg({LOGGING_ENABLED})");
    let log = cfg!(feature = "log") || std::env::var_os("CARGO_FEATURE_LOG").is_some();
    let defmt = cfg!(feature = "defmt") || std::env::var_os("CARGO_FEATURE_DEFMT").is_some();
    if log && defmt {
        panic!("You may only select one logging backend, either `log` or `defmt`.");
    }
    if log || defmt {
        println!("cargo:rustc-cfg={LOGGING_ENABLED}");
    }
}
