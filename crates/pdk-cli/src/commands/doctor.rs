// `pdk doctor`: environment probes mirroring what validation and the
// scheduler will need at run time.

use super::AppContext;
use crate::GlobalOpts;

struct Probe {
    name: &'static str,
    ok: bool,
    detail: String,
}

pub async fn execute(global: &GlobalOpts, app: AppContext) -> i32 {
    let mut probes = Vec::new();

    // Container driver.
    let health = app.driver.health().await;
    probes.push(Probe {
        name: "docker",
        ok: health.available,
        detail: if health.available {
            format!(
                "version {} ({})",
                health.version.unwrap_or_else(|| "?".into()),
                health.platform.unwrap_or_else(|| "?".into())
            )
        } else {
            health
                .error
                .unwrap_or_else(|| "driver not responding".into())
        },
    });

    // Git on PATH.
    probes.push(match which::which("git") {
        Ok(path) => Probe {
            name: "git",
            ok: true,
            detail: path.display().to_string(),
        },
        Err(_) => Probe {
            name: "git",
            ok: false,
            detail: "not found on PATH; checkout steps will fail".into(),
        },
    });

    // Pipeline detection.
    let detected = pdk_parsers::discover(&app.workspace);
    probes.push(Probe {
        name: "pipeline",
        ok: global.file.is_some() || !detected.is_empty(),
        detail: match global.file.as_deref() {
            Some(file) => file.display().to_string(),
            None if detected.is_empty() => "no pipeline file found".into(),
            None => format!(
                "{} file(s), first: {}",
                detected.len(),
                detected[0].display()
            ),
        },
    });

    // Secret store access.
    probes.push(match app.store.list() {
        Ok(names) => Probe {
            name: "secrets",
            ok: true,
            detail: format!("{} secret(s) at {}", names.len(), app.store.path().display()),
        },
        Err(e) => Probe {
            name: "secrets",
            ok: false,
            detail: e.to_string(),
        },
    });

    // Workspace writability (artifacts land under .pdk/).
    let pdk_dir = app.workspace.join(".pdk");
    let writable = std::fs::create_dir_all(&pdk_dir).is_ok();
    probes.push(Probe {
        name: "workspace",
        ok: writable,
        detail: if writable {
            app.workspace.display().to_string()
        } else {
            format!("cannot create {}", pdk_dir.display())
        },
    });

    let mut failures = 0;
    for probe in &probes {
        let mark = if probe.ok { "ok " } else { "FAIL" };
        println!("[{mark}] {:<10} {}", probe.name, probe.detail);
        if !probe.ok {
            failures += 1;
        }
    }

    if failures == 0 {
        println!("\nall probes passed");
        0
    } else {
        println!("\n{failures} probe(s) failed");
        1
    }
}
