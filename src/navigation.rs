//! URL arguments, navigation history and navigation causes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Why a navigation happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationCause {
    Initialization,
    /// Back/forward through history.
    History,
    Refresh,
    /// Returning from a temporary view, which behaves like going back.
    LeavingVirtual,
    /// A link or key press opened something.
    Navigation,
    Other(String),
}

impl NavigationCause {
    pub fn as_str(&self) -> &str {
        match self {
            NavigationCause::Initialization => "initialization",
            NavigationCause::History => "history",
            NavigationCause::Refresh => "refresh",
            NavigationCause::LeavingVirtual => "leaving-virtual",
            NavigationCause::Navigation => "navigation",
            NavigationCause::Other(cause) => cause,
        }
    }

    /// Whether screens should restore their saved state (scroll position,
    /// selection) instead of starting fresh.
    pub fn restores_history(&self) -> bool {
        matches!(
            self,
            NavigationCause::Initialization
                | NavigationCause::History
                | NavigationCause::LeavingVirtual
        )
    }
}

impl From<&str> for NavigationCause {
    fn from(cause: &str) -> Self {
        match cause {
            "initialization" => NavigationCause::Initialization,
            "history" => NavigationCause::History,
            "refresh" => NavigationCause::Refresh,
            "leaving-virtual" => NavigationCause::LeavingVirtual,
            "navigation" => NavigationCause::Navigation,
            other => NavigationCause::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NavigationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location: a path that selects the data source, and hash arguments that
/// hold view state (`view`, `illust_id`, `page`, `slideshow`, ...).
///
/// Written as `/path#key=value&key=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub path: String,
    pub hash: BTreeMap<String, String>,
}

impl Args {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.hash.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.hash.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.hash.remove(key)
    }

    /// The path split into decoded segments.
    pub fn segments(&self) -> Vec<String> {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect()
    }
}

impl FromStr for Args {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, hash) = s.split_once('#').unwrap_or((s, ""));
        let path = if path.is_empty() { "/" } else { path };

        let mut args = Args::new(path);
        for pair in hash.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            };
            args.hash.insert(decode(key), decode(value));
        }
        Ok(args)
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if self.hash.is_empty() {
            return Ok(());
        }
        let pairs: Vec<_> = self
            .hash
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        write!(f, "#{}", pairs.join("&"))
    }
}

#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub add_to_history: bool,
    pub cause: NavigationCause,
    /// Deliver the cause to the event loop so the app transitions. Callers that
    /// run the transition themselves turn this off.
    pub send_popstate: bool,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            add_to_history: true,
            cause: NavigationCause::Navigation,
            send_popstate: true,
        }
    }
}

struct History {
    current: Args,
    back: Vec<Args>,
}

/// The current location and back history. Navigating sends the cause to the
/// event loop, which runs the screen transition.
pub struct Navigator {
    history: Mutex<History>,
    events: mpsc::UnboundedSender<NavigationCause>,
}

impl Navigator {
    pub fn new(initial: Args) -> (Self, mpsc::UnboundedReceiver<NavigationCause>) {
        let (events, rx) = mpsc::unbounded_channel();
        let navigator = Self {
            history: Mutex::new(History {
                current: initial,
                back: Vec::new(),
            }),
            events,
        };
        (navigator, rx)
    }

    pub fn location(&self) -> Args {
        self.history.lock().current.clone()
    }

    pub fn navigate(&self, args: Args, options: NavigateOptions) {
        {
            let mut history = self.history.lock();
            if history.current == args {
                debug!("Already at {args}");
                return;
            }
            debug!("Navigating to {args} ({})", options.cause);
            let previous = std::mem::replace(&mut history.current, args);
            if options.add_to_history {
                history.back.push(previous);
            }
        }

        if options.send_popstate {
            let _ = self.events.send(options.cause);
        }
    }

    #[cfg(test)]
    pub fn can_go_back(&self) -> bool {
        !self.history.lock().back.is_empty()
    }

    /// Go back one entry. Returns false if there's nothing to go back to.
    pub fn back(&self) -> bool {
        {
            let mut history = self.history.lock();
            let Some(previous) = history.back.pop() else {
                return false;
            };
            history.current = previous;
        }
        let _ = self.events.send(NavigationCause::History);
        true
    }
}
