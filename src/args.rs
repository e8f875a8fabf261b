use std::path::PathBuf;

use clap::{Parser, ValueHint};
use clap_complete::Shell;

use crate::settings::CliOverrides;

#[derive(Parser, Debug)]
#[clap(
    version,
    about = "sweep address mappings x traces through a memory simulator",
    long_about = None,
    trailing_var_arg = true
)]
pub struct Args {
    /// Generate completion for the given shell
    #[clap(long = "generate", short = 'g', arg_enum)]
    pub generator: Option<Shell>,
    /// base simulator config yaml, overrides `base_config`
    #[clap(long, short = 'c', parse(from_os_str), value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// output log folder, must not exist yet
    #[clap(long = "output-dir", short = 'o', parse(from_os_str), value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
    /// delete access logs and command traces once their figures are drawn
    #[clap(long)]
    pub auto_clean: bool,
    /// print detail info
    #[clap(long, short = 'v')]
    pub verbose: bool,
    /// skip the per trial figures
    #[clap(long)]
    pub no_plot: bool,
    /// the sweep settings files, default is "configs/default.toml"
    #[clap(parse(from_os_str), value_hint = ValueHint::FilePath)]
    pub settings_files: Vec<PathBuf>,
}

impl Args {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            base_config: self.config.clone(),
            output_dir: self.output_dir.clone(),
            auto_clean: self.auto_clean,
            verbose: self.verbose,
            no_plot: self.no_plot,
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags() {
        let args = Args::parse_from([
            "mapping_dse",
            "-c",
            "ddr4.yaml",
            "-o",
            "log/run1",
            "--auto-clean",
            "--no-plot",
            "configs/default.toml",
            "configs/extra.toml",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("ddr4.yaml")));
        assert_eq!(args.output_dir, Some(PathBuf::from("log/run1")));
        assert!(args.auto_clean);
        assert!(args.no_plot);
        assert!(!args.verbose);
        assert_eq!(args.settings_files.len(), 2);
        let overrides = args.overrides();
        assert!(overrides.no_plot);
    }
}
