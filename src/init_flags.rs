// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-wide configuration, loaded once at startup from `INIT_<flag>=<value>`
//! strings. Static flags are read through `get_<flag>()` / `<flag>_is_enabled()`,
//! dynamic flags can additionally be changed with `update_<flag>()`.

use lazy_static::lazy_static;
use log::{error, info};
use paste::paste;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

// Fallback to bool when type is not specified
macro_rules! type_expand {
    () => {
        bool
    };
    ($type:ty) => {
        $type
    };
}

macro_rules! default_value {
    () => {
        false
    };
    ($type:ty) => {
        <$type>::default()
    };
    ($($type:ty)? = $default:expr) => {
        $default
    };
}

macro_rules! create_getter_fn {
    ($flag:ident) => {
        paste! {
            #[doc = concat!(" Return true if ", stringify!($flag), " is enabled")]
            pub fn [<$flag _is_enabled>]() -> bool {
                FLAGS.lock().unwrap().$flag
            }
        }
    };
    ($flag:ident $type:ty) => {
        paste! {
            #[doc = concat!(" Return the flag value of ", stringify!($flag))]
            pub fn [<get_ $flag>]() -> $type {
                FLAGS.lock().unwrap().$flag
            }
        }
    };
}

macro_rules! create_setter_fn {
    ($flag:ident) => {
        paste! {
            #[doc = concat!(" Update value of ", stringify!($flag), " at runtime")]
            pub fn [<update_ $flag>](value: bool) {
                FLAGS.lock().unwrap().$flag = value;
            }
        }
    };
    ($flag:ident $type:ty) => {
        paste! {
            #[doc = concat!(" Update value of ", stringify!($flag), " at runtime")]
            pub fn [<update_ $flag>](value: $type) {
                FLAGS.lock().unwrap().$flag = value;
            }
        }
    };
}

macro_rules! stack_flags {
    (
     name: $name:ident
     flags: { $($flag:ident $(: $type:ty)? $(= $default:expr)?,)* }
     dynamic_flags: { $($dy_flag:ident $(: $dy_type:ty)? $(= $dy_default:expr)?,)* }
     extra_fields: { $($extra_field:ident : $extra_field_type:ty,)* }
     extra_parsed_flags: { $($extra_flag:tt => $extra_flag_fn:ident,)* }
    ) => {
        struct $name {
            $($flag : type_expand!($($type)?),)*
            $($dy_flag : type_expand!($($dy_type)?),)*
            $($extra_field : $extra_field_type,)*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($flag : default_value!($($type)? $(= $default)?),)*
                    $($dy_flag : default_value!($($dy_type)? $(= $dy_default)?),)*
                    $($extra_field : <$extra_field_type>::default(),)*
                }
            }
        }

        impl $name {
            fn parse(flags: Vec<String>) -> Self {
                let mut init_flags = Self::default();

                for flag in flags {
                    let values: Vec<&str> = flag.split('=').collect();
                    if values.len() != 2 {
                        error!("Bad flag {}, must be in <FLAG>=<VALUE> format", flag);
                        continue;
                    }

                    match values[0] {
                        $(concat!("INIT_", stringify!($flag)) =>
                            init_flags.$flag = values[1].parse().unwrap_or_else(|e| {
                                error!("Parse failure on '{}': {}", flag, e);
                                default_value!($($type)? $(= $default)?)}),)*
                        $(concat!("INIT_", stringify!($dy_flag)) =>
                            init_flags.$dy_flag = values[1].parse().unwrap_or_else(|e| {
                                error!("Parse failure on '{}': {}", flag, e);
                                default_value!($($dy_type)? $(= $dy_default)?)}),)*
                        $($extra_flag => $extra_flag_fn(&mut init_flags, values[1]),)*
                        _ => error!("Unsaved flag: {} = {}", values[0], values[1])
                    }
                }

                init_flags
            }

            fn dump(&self) -> BTreeMap<&'static str, String> {
                [
                    $((stringify!($flag), format!("{}", self.$flag)),)*
                    $((stringify!($dy_flag), format!("{}", self.$dy_flag)),)*
                    $((stringify!($extra_field), format!("{}", self.$extra_field)),)*
                ].into()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let entries: Vec<String> =
                    self.dump().into_iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{}", entries.join(","))
            }
        }

        $(create_getter_fn!($flag $($type)?);)*
        $(create_getter_fn!($dy_flag $($dy_type)?);)*
        $(create_setter_fn!($dy_flag $($dy_type)?);)*
    }
}

#[derive(Default)]
struct ExplicitTagSettings {
    map: HashMap<String, i32>,
}

impl fmt::Display for ExplicitTagSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.map)
    }
}

fn log_level_from_str(tag_value: &str) -> Option<i32> {
    match tag_value {
        "LOG_FATAL" => Some(LOG_TAG_FATAL),
        "LOG_ERROR" => Some(LOG_TAG_ERROR),
        "LOG_WARN" => Some(LOG_TAG_WARN),
        "LOG_NOTICE" => Some(LOG_TAG_NOTICE),
        "LOG_INFO" => Some(LOG_TAG_INFO),
        "LOG_DEBUG" => Some(LOG_TAG_DEBUG),
        "LOG_VERBOSE" => Some(LOG_TAG_VERBOSE),
        _ => None,
    }
}

fn parse_log_level(flags: &mut StackFlags, value: &str) {
    match log_level_from_str(value) {
        Some(level) => flags.default_log_level = level,
        None => error!("Invalid log level {value}"),
    }
}

fn parse_logging_tag(flags: &mut StackFlags, value: &str) {
    for tag in value.split(',') {
        if let Some((name, level)) = tag.split_once(':') {
            if let Some(level) = log_level_from_str(level) {
                flags.logging_explicit_tag_settings.map.insert(name.into(), level);
            }
        }
    }
}

/// Returns the log level for given tag
pub fn get_log_level_for_tag(tag: &str) -> i32 {
    let guard = FLAGS.lock().unwrap();
    *guard.logging_explicit_tag_settings.map.get(tag).unwrap_or(&guard.default_log_level)
}

/// Fatal log level.
pub const LOG_TAG_FATAL: i32 = 0;
/// Error log level.
pub const LOG_TAG_ERROR: i32 = 1;
/// Warning log level.
pub const LOG_TAG_WARN: i32 = 2;
/// Notice log level.
pub const LOG_TAG_NOTICE: i32 = 3;
/// Info log level. This is the default.
pub const LOG_TAG_INFO: i32 = 4;
/// Debug log level.
pub const LOG_TAG_DEBUG: i32 = 5;
/// Verbose log level.
pub const LOG_TAG_VERBOSE: i32 = 6;

stack_flags!(
    name: StackFlags
    flags: {
        device_record_capacity: usize = 40,
        connection_history_size: usize = 40,
        acceptlist_default_size: usize = 8,
        resolving_list_default_size: usize = 8,
        inquiry_db_size: usize = 40,
        inquiry_filter_size: usize = 256,
        inquiry_history_size: usize = 10,
        stack_event_loop = true,
        redact_log = true,
    }
    // dynamic flags can be updated at runtime and should be accessed directly
    // to check.
    dynamic_flags: {
        default_log_level: i32 = LOG_TAG_INFO,
    }
    // extra_fields are not a 1 to 1 match with "INIT_*" flags
    extra_fields: {
        logging_explicit_tag_settings: ExplicitTagSettings,
    }
    extra_parsed_flags: {
        "INIT_default_log_level_str" => parse_log_level,
        "INIT_log_level_for_tags" => parse_logging_tag,
    }
);

lazy_static! {
    /// Store the flag values
    static ref FLAGS: Mutex<StackFlags> = Mutex::new(StackFlags::default());
}

/// Loads the flag values from the passed-in vector of string values
pub fn load(raw_flags: Vec<String>) {
    crate::logging::init_logging();

    let flags = StackFlags::parse(raw_flags);
    info!("Flags loaded: {}", flags);
    *FLAGS.lock().unwrap() = flags;

    // re-init to respect log levels set by flags
    crate::logging::init_logging();
}

/// Dumps all flag K-V pairs, storing values as strings
pub fn dump() -> BTreeMap<&'static str, String> {
    FLAGS.lock().unwrap().dump()
}
