//! What the host application tells us about the current unit of work.

/// The host owns the request/command lifecycle; this is what it shares with
/// the logger.
pub trait HostContext: Send + Sync {
    /// URL of the current request, or the joined argument vector of the
    /// current console command.
    fn unit_label(&self) -> String;

    /// Name of the active environment, e.g. `local` or `production`.
    fn environment(&self) -> String;

    /// Whether the current unit of work is a console invocation.
    fn is_console(&self) -> bool;
}

/// A fixed [`HostContext`], handy for console tools and tests.
#[derive(Debug, Clone)]
pub struct StaticHost {
    label: String,
    environment: String,
    console: bool,
}

impl StaticHost {
    /// A web request for `url`.
    pub fn web(url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            label: url.into(),
            environment: environment.into(),
            console: false,
        }
    }

    /// A console command made of `args`.
    pub fn console<I, S>(args: I, environment: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let label = args
            .into_iter()
            .map(|arg| arg.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            label,
            environment: environment.into(),
            console: true,
        }
    }

    /// The running process as a console command.
    pub fn current_process(environment: impl Into<String>) -> Self {
        Self::console(std::env::args(), environment)
    }
}

impl HostContext for StaticHost {
    fn unit_label(&self) -> String {
        self.label.clone()
    }

    fn environment(&self) -> String {
        self.environment.clone()
    }

    fn is_console(&self) -> bool {
        self.console
    }
}
