use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use tracing::Metadata;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriter;

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_NOISE_FILTER: &str = "hyper=warn,tower_http=warn";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "vidgen";
pub const DEFAULT_LOG_FILE_SUFFIX: &str = "log";
pub const REDACTION_PLACEHOLDER: &str = "***REDACTED***";

/// Targets that stay quiet on the console but are kept at debug in the file.
const FILE_DEBUG_TARGETS: [&str; 1] = ["tower_http"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeLogMode {
    Cli,
    Server,
}

impl RuntimeLogMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Server => "server",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitOptions {
    pub mode: RuntimeLogMode,
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_log_filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub default_log_filter: String,
    pub noise_filter: String,
    pub retention_files: usize,
}

impl Default for LoggingInitOptions {
    fn default() -> Self {
        Self {
            mode: RuntimeLogMode::Server,
            data_dir: None,
            verbose: 0,
            cli_log_filter: None,
            rust_log_env: None,
            default_log_filter: DEFAULT_LOG_FILTER.to_string(),
            noise_filter: DEFAULT_NOISE_FILTER.to_string(),
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingFilterPlan {
    pub user_filter: String,
    pub console_filter: String,
    pub file_filter: String,
}

#[derive(Debug)]
pub struct LoggingInitPlan {
    pub filters: LoggingFilterPlan,
    pub file_sink: FileSinkPlan,
}

#[derive(Debug)]
pub enum FileSinkPlan {
    Ready {
        log_dir: PathBuf,
        retention_files: usize,
        appender: RollingFileAppender,
    },
    Disabled {
        attempted_log_dir: Option<PathBuf>,
        reason: String,
    },
}

impl FileSinkPlan {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn log_dir(&self) -> Option<&PathBuf> {
        match self {
            Self::Ready { log_dir, .. } => Some(log_dir),
            Self::Disabled {
                attempted_log_dir, ..
            } => attempted_log_dir.as_ref(),
        }
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        match self {
            Self::Ready { .. } => None,
            Self::Disabled { reason, .. } => Some(reason.as_str()),
        }
    }
}

pub fn compose_logging_init_plan(options: &LoggingInitOptions) -> LoggingInitPlan {
    LoggingInitPlan {
        filters: compose_logging_filters(options),
        file_sink: build_file_sink_plan(options),
    }
}

pub fn build_file_sink_plan(options: &LoggingInitOptions) -> FileSinkPlan {
    let retention_files = if options.retention_files == 0 {
        DEFAULT_LOG_RETENTION_FILES
    } else {
        options.retention_files
    };

    let Some(data_dir) = options.data_dir.as_deref() else {
        return FileSinkPlan::Disabled {
            attempted_log_dir: None,
            reason: "file sink disabled: data_dir is not configured".to_string(),
        };
    };

    let log_dir = data_dir.join(DEFAULT_LOG_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&log_dir) {
        return FileSinkPlan::Disabled {
            attempted_log_dir: Some(log_dir),
            reason: format!("failed to create log directory: {error}"),
        };
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_FILE_PREFIX)
        .filename_suffix(DEFAULT_LOG_FILE_SUFFIX)
        .max_log_files(retention_files)
        .build(&log_dir);

    match appender {
        Ok(appender) => FileSinkPlan::Ready {
            log_dir,
            retention_files,
            appender,
        },
        Err(error) => FileSinkPlan::Disabled {
            attempted_log_dir: Some(log_dir),
            reason: format!("failed to initialize rolling file sink: {error}"),
        },
    }
}

/// An explicit `--log-filter` or `-v` turns the noise filter off for both
/// sinks; otherwise the console gets it as is and the file gets a copy with
/// [`FILE_DEBUG_TARGETS`] raised to debug.
pub fn compose_logging_filters(options: &LoggingInitOptions) -> LoggingFilterPlan {
    let user_filter = select_user_filter(options);
    let implicit = options.cli_log_filter.is_none() && options.verbose == 0;
    let noise = options.noise_filter.trim();

    if !implicit || noise.is_empty() {
        return LoggingFilterPlan {
            console_filter: user_filter.clone(),
            file_filter: user_filter.clone(),
            user_filter,
        };
    }

    LoggingFilterPlan {
        console_filter: format!("{noise},{user_filter}"),
        file_filter: format!("{},{user_filter}", file_noise_filter(noise)),
        user_filter,
    }
}

fn select_user_filter(options: &LoggingInitOptions) -> String {
    match (options.cli_log_filter.as_deref(), options.verbose) {
        (Some(filter), _) => filter.to_string(),
        (None, v) if v >= 2 => "trace".to_string(),
        (None, 1) => "debug".to_string(),
        (None, _) => options
            .rust_log_env
            .clone()
            .unwrap_or_else(|| options.default_log_filter.clone()),
    }
}

fn file_noise_filter(noise_filter: &str) -> String {
    let mut directives: Vec<String> = noise_filter
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .filter(|directive| {
            let target = directive.split_once('=').map_or(*directive, |(t, _)| t.trim());
            !FILE_DEBUG_TARGETS.contains(&target)
        })
        .map(str::to_string)
        .collect();
    directives.extend(FILE_DEBUG_TARGETS.iter().map(|target| format!("{target}=debug")));
    directives.join(",")
}

/// Wraps a writer factory so every emitted line passes through
/// [`redact_sensitive_text`].
#[derive(Debug)]
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }

    fn make_writer_for(&'a self, metadata: &Metadata<'_>) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer_for(metadata))
    }
}

/// Buffers until a newline so a secret split across writes is still caught.
#[derive(Debug)]
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, upto: usize) -> io::Result<()> {
        let chunk: Vec<u8> = self.pending.drain(..upto).collect();
        let text = String::from_utf8_lossy(&chunk);
        self.inner
            .write_all(redact_sensitive_text(text.as_ref()).as_bytes())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            self.emit(newline + 1)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.emit(self.pending.len())?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Masks `user:pass@` in URLs and the values of credential-like `key=value`
/// or `key: value` pairs, including a leading `Bearer `.
pub fn redact_sensitive_text(input: &str) -> String {
    redact_assignments(&redact_url_userinfo(input))
}

fn redact_url_userinfo(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(scheme_end) = rest.find("://") {
        let authority_start = scheme_end + 3;
        let authority_len = rest[authority_start..]
            .find(|ch: char| ch.is_whitespace() || "/?#\"'<>".contains(ch))
            .unwrap_or(rest.len() - authority_start);
        let authority = &rest[authority_start..authority_start + authority_len];

        output.push_str(&rest[..authority_start]);
        match authority.rfind('@') {
            Some(at) if at > 0 => {
                output.push_str(REDACTION_PLACEHOLDER);
                output.push_str(&authority[at..]);
            }
            _ => output.push_str(authority),
        }
        rest = &rest[authority_start + authority_len..];
    }

    output.push_str(rest);
    output
}

fn redact_assignments(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(separator) = rest.find(['=', ':']) {
        let (head, tail) = rest.split_at(separator);
        let key_start = head
            .rfind(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
            .map_or(0, |index| index + 1);
        let key = &head[key_start..];

        output.push_str(head);
        output.push_str(&tail[..1]);
        rest = &tail[1..];

        if key.is_empty() || !is_sensitive_key(&key.to_ascii_lowercase()) {
            continue;
        }

        let trimmed = rest.trim_start();
        output.push_str(&rest[..rest.len() - trimmed.len()]);
        rest = trimmed;

        if rest
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
        {
            output.push_str(&rest[..7]);
            rest = &rest[7..];
        }

        let (quote, body) = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => (Some(quote), &rest[1..]),
            _ => (None, rest),
        };
        let value_len = match quote {
            Some(quote) => body.find(quote).unwrap_or(body.len()),
            None => body
                .find(|ch: char| ch.is_whitespace() || "&,;)]}\"'".contains(ch))
                .unwrap_or(body.len()),
        };
        if value_len == 0 {
            continue;
        }

        if let Some(quote) = quote {
            output.push(quote);
        }
        output.push_str(REDACTION_PLACEHOLDER);
        rest = &body[value_len..];
    }

    output.push_str(rest);
    output
}

fn is_sensitive_key(key: &str) -> bool {
    matches!(key, "key" | "pwd" | "passwd" | "authorization")
        || ["token", "secret", "password"]
            .iter()
            .any(|needle| key.contains(needle))
        || key.ends_with("_key")
        || key.ends_with("-key")
        || key.ends_with("apikey")
}
