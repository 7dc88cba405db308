//! Metadata a plugin exposes about itself.

use std::ffi::{c_char, CStr};

use super::abi::{symbols, PluginAbi, PluginFlags};
use super::buffer::BufferLedger;
use super::error::{DispatchError, LoadError};
use super::version::{self, AbiVersion};

/// Immutable description of a loaded plugin, read once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    /// Version string exactly as the plugin reported it.
    pub version: String,
    pub abi_version: AbiVersion,
    /// The command this plugin registers.
    pub command: String,
    /// Expected argument names. A trailing `?` marks an optional argument.
    pub expected_args: Vec<String>,
    pub flags: PluginFlags,
}

impl PluginDescriptor {
    /// Query the plugin's accessors, checking the version first so nothing
    /// else is called on an incompatible plugin.
    ///
    /// Each accessor is called exactly once.
    ///
    /// # Errors
    /// Version errors from [`version::negotiate`], or
    /// [`LoadError::InvalidDescriptor`] for null, non-UTF-8 or malformed
    /// accessor output.
    pub fn read(
        abi: &dyn PluginAbi,
        ledger: &mut BufferLedger,
        host: &AbiVersion,
    ) -> Result<Self, LoadError> {
        let version = read_c_str(abi.version(), symbols::VERSION)?;
        let abi_version = version::negotiate(&version, host)?;

        let name = read_c_str(abi.name(), symbols::NAME)?;
        let command = read_c_str(abi.command(), symbols::COMMAND)?;
        if command.is_empty() || command.chars().any(char::is_whitespace) {
            return Err(LoadError::InvalidDescriptor(format!(
                "command name `{command}` must be a single non-empty word"
            )));
        }

        let expected_args = match ledger.adopt(abi, abi.args(), None) {
            Ok(Some(buffer)) => buffer.decode().map_err(|err| {
                LoadError::InvalidDescriptor(format!("argument list: {err}"))
            })?,
            Ok(None) => Vec::new(),
            Err(violation) => {
                return Err(LoadError::InvalidDescriptor(format!(
                    "argument list: {violation}"
                )))
            }
        };

        Ok(Self {
            name,
            version,
            abi_version,
            command,
            expected_args,
            flags: abi.flags(),
        })
    }

    /// `(required, maximum)` argument counts.
    #[must_use]
    pub fn arity(&self) -> (usize, usize) {
        let optional = self
            .expected_args
            .iter()
            .filter(|arg| arg.ends_with('?'))
            .count();
        (self.expected_args.len() - optional, self.expected_args.len())
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.flags.contains(PluginFlags::STRICT_ARITY)
    }

    /// Validate an argument count against the declared arity.
    ///
    /// # Errors
    /// [`DispatchError::ArityMismatch`] when the count is out of range.
    pub fn check_arity(&self, found: usize) -> Result<(), DispatchError> {
        let (required, maximum) = self.arity();
        if (required..=maximum).contains(&found) {
            return Ok(());
        }
        let expected = if required == maximum {
            required.to_string()
        } else {
            format!("{required} to {maximum}")
        };
        Err(DispatchError::ArityMismatch {
            command: self.command.clone(),
            expected,
            found,
        })
    }

    /// Usage line for help output, e.g. `grep <pattern> [file]`.
    #[must_use]
    pub fn usage(&self) -> String {
        let mut usage = self.command.clone();
        for arg in &self.expected_args {
            match arg.strip_suffix('?') {
                Some(optional) => usage.push_str(&format!(" [{optional}]")),
                None => usage.push_str(&format!(" <{arg}>")),
            }
        }
        usage
    }
}

fn read_c_str(ptr: *const c_char, symbol: &[u8]) -> Result<String, LoadError> {
    let accessor = symbols::display(symbol);
    if ptr.is_null() {
        return Err(LoadError::InvalidDescriptor(format!(
            "`{accessor}` returned null"
        )));
    }
    // SAFETY: the ABI requires accessors to return NUL-terminated strings that
    // stay valid for the life of the library.
    let text = unsafe { CStr::from_ptr(ptr) };
    text.to_str().map(str::to_owned).map_err(|_| {
        LoadError::InvalidDescriptor(format!("`{accessor}` returned invalid UTF-8"))
    })
}
