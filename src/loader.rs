//! C7: the dynamic loader — resolves symbols in a traced runtime and hands out
//! a typed function-pointer registry.
//!
//! Grounded directly on `loader.h`'s
//! `BaseLoader<T>`: a lazily-initialized singleton that `dlopen`s the runtime
//! library (`RTLD_LAZY`, or `RTLD_LAZY | RTLD_NOLOAD` when auto-load is off),
//! resolves every declared symbol via `dlsym`, and aborts with a diagnostic on
//! a required-symbol miss. Rendered with `OnceLock` instead of the original's
//! hand-rolled double-checked-locking atomic pointer + mutex, since `OnceLock`
//! gives the same "init once, then read-only" guarantee without hand-written
//! fencing.

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::sync::OnceLock;

/// Common surface for both the dynamic (`dlopen`) loader and its static-link
/// alternate (§4.7: "a thin static-link alternate where the runtime is linked
/// directly; the same interface is preserved").
pub trait RuntimeLoader {
    fn is_enabled(&self) -> bool;
    fn symbol(&self, name: &str) -> Option<*mut c_void>;
}

struct LoadedState {
    handle: usize,
    symbols: HashMap<&'static str, usize>,
}

/// A lazily-initialized, dlopen-backed loader for one traced runtime library.
pub struct DynamicLoader {
    lib_name: &'static str,
    auto_load: bool,
    required_symbols: &'static [&'static str],
    state: OnceLock<LoadedState>,
}

impl DynamicLoader {
    pub const fn new(lib_name: &'static str, auto_load: bool, required_symbols: &'static [&'static str]) -> Self {
        DynamicLoader {
            lib_name,
            auto_load,
            required_symbols,
            state: OnceLock::new(),
        }
    }

    fn state(&self) -> &LoadedState {
        self.state.get_or_init(|| self.open())
    }

    fn open(&self) -> LoadedState {
        let cname = CString::new(self.lib_name).expect("library name must not contain NUL");
        let flags = if self.auto_load {
            libc::RTLD_LAZY
        } else {
            libc::RTLD_LAZY | libc::RTLD_NOLOAD
        };
        let handle = unsafe { libc::dlopen(cname.as_ptr(), flags) };
        if handle.is_null() {
            log::warn!(
                "loader: {} not resolved (auto_load={})",
                self.lib_name,
                self.auto_load
            );
            return LoadedState {
                handle: 0,
                symbols: HashMap::new(),
            };
        }

        let mut symbols = HashMap::with_capacity(self.required_symbols.len());
        for &name in self.required_symbols {
            let csym = CString::new(name).expect("symbol name must not contain NUL");
            let ptr = unsafe { libc::dlsym(handle, csym.as_ptr()) };
            if ptr.is_null() {
                log::error!("loader: required symbol `{name}` missing in {}", self.lib_name);
                panic!("accel-trace: required symbol `{name}` missing in {}", self.lib_name);
            }
            log::trace!("loader: resolved `{name}` in {}", self.lib_name);
            symbols.insert(name, ptr as usize);
        }
        log::debug!("loader: {} opened, {} symbols resolved", self.lib_name, symbols.len());
        LoadedState {
            handle: handle as usize,
            symbols,
        }
    }
}

impl RuntimeLoader for DynamicLoader {
    fn is_enabled(&self) -> bool {
        self.state().handle != 0
    }

    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        self.state().symbols.get(name).map(|&p| p as *mut c_void)
    }
}

/// The static-link alternate: the embedder links the runtime directly and
/// hands over already-resolved function pointers instead of asking this
/// crate to `dlopen` anything.
pub struct StaticLoader {
    symbols: HashMap<&'static str, *mut c_void>,
}

impl StaticLoader {
    pub fn new(symbols: HashMap<&'static str, *mut c_void>) -> Self {
        StaticLoader { symbols }
    }
}

impl RuntimeLoader for StaticLoader {
    fn is_enabled(&self) -> bool {
        true
    }

    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        self.symbols.get(name).copied()
    }
}

// Safety: `*mut c_void` symbol pointers are opaque function addresses handed
// out for the caller to transmute to the correct function-pointer type; they
// are never dereferenced by this crate.
unsafe impl Send for StaticLoader {}
unsafe impl Sync for StaticLoader {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn auto_load_disabled_and_library_absent_is_not_enabled() {
        let loader = DynamicLoader::new("libdefinitely-not-a-real-accel-runtime.so", false, &[]);
        assert!(!loader.is_enabled());
        assert!(loader.symbol("anything").is_none());
    }

    #[test]
    fn static_loader_is_always_enabled() {
        let mut map = HashMap::new();
        map.insert("my_symbol", std::ptr::null_mut());
        let loader = StaticLoader::new(map);
        assert!(loader.is_enabled());
        assert!(loader.symbol("my_symbol").is_some());
        assert!(loader.symbol("missing").is_none());
    }
}
