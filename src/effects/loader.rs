//! Effect module runtime
//!
//! Effect kernels ship per platform. Loading the runtime is an explicit step
//! that takes the operating system and CPU architecture, resolves the
//! library name and resource path for that pair, and hands out bindings that
//! every effect module needs at construction.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::error::{RackError, Result};

/// Base name of the effect library
const LIBRARY_NAME: &str = "effects";

/// Modules the effect library exports
pub const MODULES: [&str; 3] = ["limiter", "channel_balancer", "graphic_equalizer"];

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::MacOs => "macos",
            Os::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

/// Operating system and architecture pair the effect library is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// Resolve a platform from OS and architecture names
    ///
    /// # Errors
    /// `UnsupportedPlatform` for anything other than linux, macos or windows
    /// on x86_64 (amd64) or aarch64 (arm64).
    pub fn new(os: &str, arch: &str) -> Result<Self> {
        let unsupported = || RackError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };

        let os_name = os.to_ascii_lowercase();
        let parsed_os = if os_name.contains("mac") || os_name == "darwin" {
            Os::MacOs
        } else if os_name.contains("win") {
            Os::Windows
        } else if os_name.contains("linux") || os_name.contains("nix") {
            Os::Linux
        } else {
            return Err(unsupported());
        };

        let parsed_arch = match arch.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            _ => return Err(unsupported()),
        };

        Ok(Self {
            os: parsed_os,
            arch: parsed_arch,
        })
    }

    /// Platform of the running process
    pub fn detect() -> Result<Self> {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// File name of the effect library on this platform
    pub fn library_file_name(&self) -> String {
        match self.os {
            Os::Windows => format!("{}.dll", LIBRARY_NAME),
            Os::MacOs => format!("lib{}.dylib", LIBRARY_NAME),
            Os::Linux => format!("lib{}.so", LIBRARY_NAME),
        }
    }

    /// Resource path the library is packaged under
    pub fn resource_path(&self) -> String {
        format!("native/{}/{}", self, self.library_file_name())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.arch.as_str())
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Handle an effect module keeps to the runtime it was bound through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBinding {
    pub module: &'static str,
    pub platform: Platform,
    pub resource_path: String,
}

#[derive(Debug)]
struct RuntimeInner {
    platform: Platform,
    resource_path: String,
    bindings: AtomicUsize,
}

/// Loaded effect runtime, cheap to clone
#[derive(Debug, Clone)]
pub struct EffectRuntime {
    inner: Arc<RuntimeInner>,
}

impl EffectRuntime {
    /// Load the effect library for `platform`
    ///
    /// The kernels are built into the crate, so a resolved [`Platform`] always
    /// loads. Unsupported OS/architecture pairs are rejected earlier, by
    /// [`Platform::new`].
    pub fn load(platform: Platform) -> Self {
        let resource_path = platform.resource_path();
        info!("Effect runtime loaded for {} ({})", platform, resource_path);

        Self {
            inner: Arc::new(RuntimeInner {
                platform,
                resource_path,
                bindings: AtomicUsize::new(0),
            }),
        }
    }

    /// Load for the running process's platform
    ///
    /// # Errors
    /// `UnsupportedPlatform` when the host OS or architecture has no build of
    /// the effect library.
    pub fn load_native() -> Result<Self> {
        Ok(Self::load(Platform::detect()?))
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform
    }

    pub fn resource_path(&self) -> &str {
        &self.inner.resource_path
    }

    /// Number of modules bound through this runtime so far
    pub fn bindings(&self) -> usize {
        self.inner.bindings.load(Ordering::Relaxed)
    }

    /// Bind one exported module
    ///
    /// # Errors
    /// `InvalidFilter` when the library exports no module of that name.
    pub fn bind(&self, module: &str) -> Result<ModuleBinding> {
        let module = MODULES
            .iter()
            .copied()
            .find(|m| *m == module)
            .ok_or_else(|| RackError::InvalidFilter {
                reason: format!("effect library has no module '{}'", module),
            })?;

        self.inner.bindings.fetch_add(1, Ordering::Relaxed);
        debug!("Bound effect module {} from {}", module, self.inner.resource_path);

        Ok(ModuleBinding {
            module,
            platform: self.inner.platform,
            resource_path: self.inner.resource_path.clone(),
        })
    }
}
