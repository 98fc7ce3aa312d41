use owo_colors::OwoColorize;

/// Enable the logger
pub fn enable_logger(verbose: bool) {
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}{}: {}",
                // Level tags are padded to keep the output aligned
                match record.level() {
                    log::Level::Error => "ERROR".red().bold().to_string(),
                    log::Level::Warn => "WARN ".yellow().bold().to_string(),
                    log::Level::Info => "INFO ".green().bold().to_string(),
                    log::Level::Debug => "DEBUG".bright_blue().bold().to_string(),
                    log::Level::Trace => "TRACE".bright_white().bold().to_string(),
                },
                // Only show the subsystem when verbose logging is on
                match verbose {
                    true => format!(" [{}]", record.target())
                        .bright_black()
                        .to_string(),
                    false => String::new(),
                },
                message
            ))
        })
        .level(match verbose {
            true => log::LevelFilter::Trace,
            false => log::LevelFilter::Info,
        })
        .chain(std::io::stdout())
        .apply()
        .unwrap();
}
