//! # Cache FFI
//!
//! The stable C-ABI surface over the memory engine, consumed by foreign
//! language runtimes.
//!
//! Contract rules (bit-stable across releases):
//! - Strings cross the boundary as UTF-8 with a NUL terminator.
//! - Every returned string is owned by this library and must be released
//!   through [`free_string`]; `free_string(NULL)` is a no-op.
//! - Every export catches internal faults and translates them to the
//!   documented failure value (`false`, `NULL`, or `0`); no fault
//!   propagates across the boundary.

#![warn(missing_docs)]

use cache_config::MemoryConfig;
use cache_memory::MemoryStore;
use once_cell::sync::Lazy;
use std::ffi::{CStr, CString};
use std::io::{Read, Write};
use std::os::raw::{c_char, c_double};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// The process-global store backing the `memory_*` exports. Configured
/// from the environment on first use.
static STORE: Lazy<MemoryStore> = Lazy::new(|| MemoryStore::from_config(&MemoryConfig::from_env()));

/// Connect/read budget for [`redis_ping`]
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Borrow a C string as `&str`; `None` for NULL or non-UTF-8 input
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string.
unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Hand a Rust string across the boundary. Interior NULs cannot be
/// represented, so they produce NULL.
fn into_c_string(s: String) -> *mut c_char {
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Run `body` with faults translated to `default`
fn guarded<T, F: FnOnce() -> T>(default: T, body: F) -> T {
    catch_unwind(AssertUnwindSafe(body)).unwrap_or(default)
}

/// Release a string previously returned by this library. NULL is ignored.
///
/// # Safety
/// `ptr` must be NULL or a pointer obtained from this library's exports,
/// released at most once.
#[no_mangle]
pub unsafe extern "C" fn free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// The library version as a caller-freed string
#[no_mangle]
pub extern "C" fn version() -> *mut c_char {
    guarded(std::ptr::null_mut(), || {
        into_c_string(env!("CARGO_PKG_VERSION").to_string())
    })
}

/// Store a value; a `ttl` of zero means no expiry. Returns `false` on any
/// invalid argument.
///
/// # Safety
/// `key` and `value` must be NULL or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn memory_set(key: *const c_char, value: *const c_char, ttl: u64) -> bool {
    guarded(false, || {
        let (Some(key), Some(value)) = (unsafe { cstr(key) }, unsafe { cstr(value) }) else {
            return false;
        };
        STORE.set(key, value.as_bytes(), ttl);
        true
    })
}

/// Fetch a value; NULL on miss (or expired entry). The caller frees the
/// result.
///
/// # Safety
/// `key` must be NULL or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn memory_get(key: *const c_char) -> *mut c_char {
    guarded(std::ptr::null_mut(), || {
        let Some(key) = (unsafe { cstr(key) }) else {
            return std::ptr::null_mut();
        };
        match STORE.get(key).and_then(|value| String::from_utf8(value).ok()) {
            Some(value) => into_c_string(value),
            None => std::ptr::null_mut(),
        }
    })
}

/// Remove a key; `true` iff an entry existed
///
/// # Safety
/// `key` must be NULL or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn memory_delete(key: *const c_char) -> bool {
    guarded(false, || {
        unsafe { cstr(key) }.is_some_and(|key| STORE.delete(key))
    })
}

/// Drop all entries
#[no_mangle]
pub extern "C" fn memory_clear() -> bool {
    guarded(false, || {
        STORE.clear();
        true
    })
}

/// Whether the key holds an unexpired entry
///
/// # Safety
/// `key` must be NULL or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn memory_exists(key: *const c_char) -> bool {
    guarded(false, || {
        unsafe { cstr(key) }.is_some_and(|key| STORE.exists(key))
    })
}

/// Sweep expired entries; returns the number reclaimed
#[no_mangle]
pub extern "C" fn memory_cleanup() -> u64 {
    guarded(0, || STORE.cleanup() as u64)
}

/// Number of unexpired entries
#[no_mangle]
pub extern "C" fn memory_count() -> u64 {
    guarded(0, || STORE.count() as u64)
}

/// Store `n` entries from parallel key/value/ttl arrays; returns how many
/// were stored. Entries with NULL or non-UTF-8 members are skipped.
///
/// # Safety
/// `keys`, `values`, and `ttls` must each be NULL or point to `n` valid
/// elements; the strings must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn memory_set_multiple(
    keys: *const *const c_char,
    values: *const *const c_char,
    ttls: *const u64,
    n: usize,
) -> u64 {
    guarded(0, || {
        if keys.is_null() || values.is_null() || ttls.is_null() {
            return 0;
        }

        let mut stored = 0u64;
        for i in 0..n {
            let (key, value, ttl) =
                unsafe { (cstr(*keys.add(i)), cstr(*values.add(i)), *ttls.add(i)) };
            if let (Some(key), Some(value)) = (key, value) {
                STORE.set(key, value.as_bytes(), ttl);
                stored += 1;
            }
        }
        stored
    })
}

/// Fetch `n` keys at once. Returns a JSON object mapping each requested
/// key, in request order, to its string value or `null`. The caller frees
/// the result.
///
/// # Safety
/// `keys` must be NULL or point to `n` NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn memory_get_multiple(
    keys: *const *const c_char,
    n: usize,
) -> *mut c_char {
    guarded(std::ptr::null_mut(), || {
        if keys.is_null() {
            return std::ptr::null_mut();
        }

        // Built by hand so the object preserves request order.
        let mut json = String::from("{");
        let mut first = true;
        for i in 0..n {
            let Some(key) = (unsafe { cstr(*keys.add(i)) }) else {
                continue;
            };
            if !first {
                json.push(',');
            }
            first = false;

            let Ok(quoted_key) = serde_json::to_string(key) else {
                return std::ptr::null_mut();
            };
            json.push_str(&quoted_key);
            json.push(':');

            match STORE.get(key).and_then(|value| String::from_utf8(value).ok()) {
                Some(value) => match serde_json::to_string(&value) {
                    Ok(quoted) => json.push_str(&quoted),
                    Err(_) => return std::ptr::null_mut(),
                },
                None => json.push_str("null"),
            }
        }
        json.push('}');
        into_c_string(json)
    })
}

/// Blocking RESP PING against `host:port`; `true` iff the server answers
/// `+PONG` within the timeout
///
/// # Safety
/// `host` must be NULL or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn redis_ping(host: *const c_char, port: u16) -> bool {
    guarded(false, || {
        let Some(host) = (unsafe { cstr(host) }) else {
            return false;
        };
        ping_resp(host, port).unwrap_or(false)
    })
}

fn ping_resp(host: &str, port: u16) -> std::io::Result<bool> {
    use std::net::{TcpStream, ToSocketAddrs};

    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"))?;

    let mut stream = TcpStream::connect_timeout(&addr, PING_TIMEOUT)?;
    stream.set_read_timeout(Some(PING_TIMEOUT))?;
    stream.set_write_timeout(Some(PING_TIMEOUT))?;

    stream.write_all(b"*1\r\n$4\r\nPING\r\n")?;
    let mut reply = [0u8; 16];
    let read = stream.read(&mut reply)?;
    Ok(reply[..read].starts_with(b"+PONG"))
}

/// LZ4-compress `data`. The result is base64-wrapped so it survives
/// NUL-terminated transport; `out_size` (when non-NULL) receives the
/// encoded length. NULL on failure; the caller frees the result.
///
/// # Safety
/// `data` must be NULL or a NUL-terminated string; `out_size` must be
/// NULL or writable.
#[no_mangle]
pub unsafe extern "C" fn compress_lz4(data: *const c_char, out_size: *mut usize) -> *mut c_char {
    guarded(std::ptr::null_mut(), || {
        let Some(data) = (unsafe { cstr(data) }) else {
            return std::ptr::null_mut();
        };
        let Ok(compressed) = lz4::block::compress(data.as_bytes(), None, true) else {
            return std::ptr::null_mut();
        };

        let encoded = BASE64.encode(compressed);
        if !out_size.is_null() {
            unsafe { *out_size = encoded.len() };
        }
        into_c_string(encoded)
    })
}

/// Reverse [`compress_lz4`]. NULL on malformed input; the caller frees
/// the result.
///
/// # Safety
/// `data` must be NULL or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn decompress_lz4(data: *const c_char) -> *mut c_char {
    guarded(std::ptr::null_mut(), || {
        let Some(data) = (unsafe { cstr(data) }) else {
            return std::ptr::null_mut();
        };
        let Ok(compressed) = BASE64.decode(data) else {
            return std::ptr::null_mut();
        };
        let Ok(raw) = lz4::block::decompress(&compressed, None) else {
            return std::ptr::null_mut();
        };
        match String::from_utf8(raw) {
            Ok(text) => into_c_string(text),
            Err(_) => std::ptr::null_mut(),
        }
    })
}

/// Time `operations` set/get/delete cycles against the global store;
/// returns operations per second (0.0 when `operations` is zero)
#[no_mangle]
pub extern "C" fn benchmark_memory(operations: u64) -> c_double {
    guarded(0.0, || {
        if operations == 0 {
            return 0.0;
        }

        let started = Instant::now();
        for i in 0..operations {
            let key = format!("bench.{i}");
            STORE.set(&key, b"benchmark-payload", 60);
            let _ = STORE.get(&key);
            STORE.delete(&key);
        }
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (operations * 3) as c_double / elapsed
        } else {
            (operations * 3) as c_double
        }
    })
}
