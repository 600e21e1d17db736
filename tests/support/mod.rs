pub mod server;

use std::path::PathBuf;

/// Write a realm file for `EXAMPLE.COM` unique to this test process.
pub fn realm_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "http-spnego-it-{}-{}.conf",
        name,
        std::process::id()
    ));
    std::fs::write(
        &path,
        "[libdefaults]\n  default_realm = EXAMPLE.COM\n\n[realms]\n  EXAMPLE.COM = {\n    kdc = kdc.example.com\n  }\n",
    )
    .unwrap();
    path
}
