//! Validation functions for configuration values.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

/// Program names become directory names under the destination, so they must
/// be safe as a single path component.
pub fn validate_program_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidProgramName")
            .with_message("program name must not be empty".into()));
    }
    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidProgramName").with_message(
            format!("Invalid program name, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access dest path {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_program_name() {
        assert!(validate_program_name("Skyrim").is_ok());
        assert!(validate_program_name("factorio-space-age").is_ok());
        assert!(validate_program_name("").is_err());
        assert!(validate_program_name("a/b").is_err());
    }

    #[test]
    fn test_validate_dir_exist() {
        let temp = TempDir::new().unwrap();
        assert!(validate_dir_exist(temp.path()).is_ok());
        assert!(validate_dir_exist(temp.path().join("missing")).is_err());

        let file = temp.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_dir_exist(&file).is_err());
    }

    #[test]
    fn test_validate_dir_exist_or_created() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b/c");
        assert!(validate_dir_exist_or_created(&nested).is_ok());
        assert!(nested.is_dir());
    }
}
