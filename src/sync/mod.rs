pub mod compress;
pub mod config;
pub mod encrypt;
pub mod engine;
pub mod fingerprint;
pub mod finish;
pub mod kv;
pub mod pattern;
pub mod policy;
pub mod resolve;
pub mod result_error;
pub mod store;
pub mod transform;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
