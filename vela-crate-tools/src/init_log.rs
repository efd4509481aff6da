use std::io::Write;

/// 安装全局 logger，格式为 `[HH:MM:SS] LEVEL [file:line] message`
///
/// 默认过滤级别为 Info，可以被 `RUST_LOG` 覆盖。
pub fn init_log() {
    let _ = builder().try_init();
}

fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let level_style = level_style(buf, record.level());
            let path_style = level_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let msg_style = level_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = short_file_name(record.file().unwrap_or(""));
            let time = chrono::Local::now().format("%H:%M:%S");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {path_style}[{file}:{line}]{path_style:#} \
                 {msg_style}{}{msg_style:#}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env();
    builder
}

fn level_style(buf: &env_logger::fmt::Formatter, level: log::Level) -> anstyle::Style {
    let color = match level {
        log::Level::Info => Some(anstyle::AnsiColor::Green),
        log::Level::Warn => Some(anstyle::AnsiColor::Yellow),
        log::Level::Error => Some(anstyle::AnsiColor::Red),
        _ => None,
    };
    let style = buf.default_level_style(level);
    match color {
        Some(color) => style.fg_color(Some(anstyle::Color::Ansi(color))),
        None => style,
    }
}

/// 只保留文件名，同时兼容 `/` 和 `\` 分隔符
fn short_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_file_name() {
        assert_eq!(short_file_name("src/frame/scheduler.rs"), "scheduler.rs");
        assert_eq!(short_file_name("src\\frame\\scheduler.rs"), "scheduler.rs");
        assert_eq!(short_file_name("lib.rs"), "lib.rs");
        assert_eq!(short_file_name(""), "");
    }

    #[test]
    fn test_init_log_twice() {
        init_log();
        init_log();
        log::info!("logger installed");
    }
}
