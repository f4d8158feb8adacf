pub mod affinity {
    use anyhow::Result;

    pub fn get_core_ids() -> Result<Vec<core_affinity::CoreId>> {
        let core_ids = core_affinity::get_core_ids()
            .ok_or_else(|| anyhow::anyhow!("could not get CPU cores for affinity"))?;
        anyhow::ensure!(
            !core_ids.is_empty(),
            "did not get any CPU cores for affinity"
        );
        Ok(core_ids)
    }

    // pin to a single CPU so that the timing loop is not migrated
    pub fn pin_cpu() -> Result<()> {
        if !core_affinity::set_for_current(get_core_ids()?[0]) {
            anyhow::bail!("could not pin to CPU 0");
        }
        Ok(())
    }

    /// CPU core for block number `n` when blocks are spread over the first
    /// `num_cpus` cores.
    pub fn core_for_block(core_ids: &[core_affinity::CoreId], num_cpus: usize, n: usize) -> usize {
        core_ids[n % num_cpus.clamp(1, core_ids.len())].id
    }
}

pub mod logging {
    use tracing_subscriber::EnvFilter;

    /// Logs to stderr, filtered by `RUST_LOG` (`info` by default).
    pub fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

pub mod report {
    use owo_colors::OwoColorize;
    use std::time::Duration;

    pub fn print_header(name: &str) {
        println!();
        println!("{}", name.blue());
        println!("{}", "=".repeat(name.len()).blue());
        println!();
    }

    pub fn print_rate(label: &str, items: u64, elapsed: Duration) {
        let items_per_sec = items as f64 / elapsed.as_secs_f64();
        println!(
            "{:>24} {} {:.3e} items/s ({items} items in {elapsed:.3?})",
            label,
            "|".blue(),
            items_per_sec.green()
        );
    }
}
