//! rsrcedit CLI
//!
//! Thin command-line front-end over the editing library: argument
//! parsing, logging setup and diagnostic reporting. The input file is
//! copied to the output path before any mutation, so a failed pass
//! never corrupts the original.

use clap::{ArgAction, Parser};
use miette::Result;
use std::path::PathBuf;

use rsrcedit::{
    edit_exe_file, EditError, EditOptions, IconAction, Subsystem, VersionEdits, VersionQuad,
};

#[derive(Parser)]
#[command(name = "rsrcedit")]
#[command(about = "Edit resources and header fields of Windows executables")]
#[command(long_about = "
rsrcedit - portable resource editor for Windows PE executables

EXAMPLES:
    # Replace the application icon
    rsrcedit app.exe out.exe --icon app.ico

    # Strip all icons and switch to a console subsystem
    rsrcedit app.exe out.exe --no-icon --console

    # Stamp version numbers and strings
    rsrcedit app.exe out.exe --file-version 1.2.3.4 \\
        --set-version CompanyName \"Acme\" --set-version ProductName \"Widget\"

ENVIRONMENT VARIABLES:
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Executable to read
    #[arg(value_name = "INPUT_EXE")]
    input: PathBuf,

    /// Path the edited executable is written to
    #[arg(value_name = "OUTPUT_EXE")]
    output: PathBuf,

    /// Print the parsed header and edit diagnostics
    #[arg(long)]
    verbose: bool,

    /// Switch the executable to the console subsystem
    #[arg(long, conflicts_with = "gui")]
    console: bool,

    /// Switch the executable to the GUI subsystem
    #[arg(long)]
    gui: bool,

    /// Replace all icons with the images from this .ico file
    #[arg(long, value_name = "PATH", conflicts_with = "no_icon")]
    icon: Option<PathBuf>,

    /// Remove all icon resources
    #[arg(long)]
    no_icon: bool,

    /// File version: 1-4 dot-separated integers in [0, 65535]
    #[arg(long, value_name = "VERSION")]
    file_version: Option<String>,

    /// Product version: 1-4 dot-separated integers in [0, 65535]
    #[arg(long, value_name = "VERSION")]
    product_version: Option<String>,

    /// Set a version string (repeatable)
    #[arg(long, value_names = ["NAME", "VALUE"], num_args = 2, action = ArgAction::Append)]
    set_version: Vec<String>,

    /// Delete a version string (repeatable)
    #[arg(long, value_name = "NAME", action = ArgAction::Append)]
    delete_version: Vec<String>,
}

impl Cli {
    fn into_options(self) -> Result<(PathBuf, PathBuf, EditOptions), EditError> {
        let subsystem = match (self.console, self.gui) {
            (true, _) => Some(Subsystem::Console),
            (_, true) => Some(Subsystem::Gui),
            _ => None,
        };
        let icon = match (self.icon, self.no_icon) {
            (Some(path), _) => Some(IconAction::Replace(path)),
            (None, true) => Some(IconAction::Remove),
            (None, false) => None,
        };

        let mut version = VersionEdits {
            file_version: self
                .file_version
                .as_deref()
                .map(str::parse::<VersionQuad>)
                .transpose()?,
            product_version: self
                .product_version
                .as_deref()
                .map(str::parse::<VersionQuad>)
                .transpose()?,
            ..VersionEdits::default()
        };
        for pair in self.set_version.chunks(2) {
            version
                .strings
                .insert(pair[0].clone(), Some(pair[1].clone()));
        }
        for name in self.delete_version {
            version.strings.insert(name, None);
        }

        let options = EditOptions {
            subsystem,
            icon,
            version,
        };
        Ok((self.input, self.output, options))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let (input, output, options) = cli.into_options()?;
    edit_exe_file(&input, &output, &options)?;
    log::info!("wrote {}", output.display());
    Ok(())
}
