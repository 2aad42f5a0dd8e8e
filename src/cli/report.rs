use anyhow::Result;

use vmbench::adapter::Backend;
use vmbench::config::Config;
use vmbench::render::{render_comparison, render_timeline};
use vmbench::store::ResultStore;

pub fn run_report(config: &Config, backends: &[Backend], timeline: bool) -> Result<bool> {
    let entries: Vec<_> = backends
        .iter()
        .map(|&b| (b, ResultStore::new(config.results_path(b)).load()))
        .collect();

    print!("{}", render_comparison(&entries));

    if timeline {
        for (backend, loaded) in &entries {
            if let Ok(loaded) = loaded {
                print!("{}", render_timeline(*backend, &loaded.samples));
            }
        }
    }

    // A REPORT WITH NOTHING TO SHOW IS A FAILURE
    Ok(entries.iter().any(|(_, r)| r.is_ok()))
}
