// backuptool/src/config/mod.rs
use chrono::{NaiveTime, Weekday};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;

const DEFAULT_BACKUP_TIME: &str = "13:00";
const DEFAULT_INTERVAL_DAYS: u32 = 3;
const DEFAULT_WEEKLY_SCHEDULE: &str = "wed 15:45,fri 15:45";
const DEFAULT_DB_FILE: &str = "backups.db";
const DEFAULT_LOG_FILE: &str = "backup.log";
const DEFAULT_CLIENT_SECRETS_FILE: &str = "client_secrets.json";
const DEFAULT_CREDENTIALS_FILE: &str = "mycreds.json";
const DEFAULT_CONTAINER_NAME: &str = "backups";
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEV_MODE_PERIOD: Duration = Duration::from_secs(60);

// Values exactly as found in the environment, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawEnvConfig {
    pub source_directory: Option<String>,
    pub archive_mode: Option<String>,
    pub output_dir: Option<String>,
    pub db_file: Option<String>,
    pub log_file: Option<String>,
    pub upload_backend: Option<String>,
    pub container_name: Option<String>,
    pub client_secrets_file: Option<String>,
    pub credentials_file: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_folder_prefix: Option<String>,
    pub schedule_mode: Option<String>,
    pub backup_time: Option<String>,
    pub test_backup_time: Option<String>,
    pub interval_days: Option<String>,
    pub weekly_schedule: Option<String>,
    pub dev_mode: Option<String>,
}

impl RawEnvConfig {
    /// Collects every known variable through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        RawEnvConfig {
            source_directory: get("SOURCE_DIRECTORY"),
            archive_mode: get("ARCHIVE_MODE"),
            output_dir: get("BACKUP_OUTPUT_DIR"),
            db_file: get("BACKUP_DB_FILE"),
            log_file: get("BACKUP_LOG_FILE"),
            upload_backend: get("UPLOAD_BACKEND"),
            container_name: get("DRIVE_FOLDER_NAME"),
            client_secrets_file: get("GOOGLE_CLIENT_SECRETS_FILE"),
            credentials_file: get("GOOGLE_CREDENTIALS_FILE"),
            s3_endpoint_url: get("S3_ENDPOINT_URL"),
            s3_region: get("S3_REGION"),
            s3_access_key_id: get("S3_ACCESS_KEY_ID"),
            s3_secret_access_key: get("S3_SECRET_ACCESS_KEY"),
            s3_folder_prefix: get("S3_FOLDER_PREFIX"),
            schedule_mode: get("SCHEDULE_MODE"),
            backup_time: get("BACKUP_TIME"),
            test_backup_time: get("TEST_BACKUP_TIME"),
            interval_days: get("BACKUP_INTERVAL_DAYS"),
            weekly_schedule: get("WEEKLY_SCHEDULE"),
            dev_mode: get("DEV_MODE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Every regular file below the source directory.
    Tree,
    /// Only the most recently modified file directly inside the source directory.
    LatestFile,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub source_dir: PathBuf,
    pub archive_mode: ArchiveMode,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub client_secrets_file: PathBuf,
    pub credentials_file: PathBuf,
    pub folder_name: String,
}

#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub enum UploadConfig {
    Drive(DriveConfig),
    S3(SpacesConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySlot {
    pub weekday: Weekday,
    pub at: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Daily wake-up at `at`, backing up only when the last success is old enough.
    Interval { at: NaiveTime },
    /// Unconditional backups on fixed weekdays.
    FixedWeekdays(Vec<WeeklySlot>),
    /// Unconditional backups every `period`, for accelerated testing.
    Development { period: Duration },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub upload: UploadConfig,
    pub schedule: ScheduleMode,
    pub interval_days: u32,
    pub db_path: PathBuf,
    pub log_file: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_raw(RawEnvConfig::from_lookup(|key| env::var(key).ok()))
    }

    pub fn from_raw(raw: RawEnvConfig) -> Result<Self, ConfigError> {
        let source_dir = raw
            .source_directory
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("SOURCE_DIRECTORY"))?;

        let archive_mode = match raw.archive_mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("tree") => ArchiveMode::Tree,
            Some("latest") | Some("latest-file") | Some("latest_file") => ArchiveMode::LatestFile,
            Some(other) => {
                return Err(invalid("ARCHIVE_MODE", other, "expected 'tree' or 'latest'"));
            }
        };

        let output_dir = match raw.output_dir {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        let container_name = raw
            .container_name
            .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());

        let upload = match raw.upload_backend.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("drive") | Some("gdrive") => UploadConfig::Drive(DriveConfig {
                client_secrets_file: PathBuf::from(
                    raw.client_secrets_file
                        .unwrap_or_else(|| DEFAULT_CLIENT_SECRETS_FILE.to_string()),
                ),
                credentials_file: PathBuf::from(
                    raw.credentials_file
                        .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string()),
                ),
                folder_name: container_name,
            }),
            Some("s3") => {
                if raw.s3_access_key_id.is_some() != raw.s3_secret_access_key.is_some() {
                    return Err(ConfigError::Conflict(
                        "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together".to_string(),
                    ));
                }
                UploadConfig::S3(SpacesConfig {
                    endpoint_url: raw.s3_endpoint_url,
                    region: raw.s3_region.unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                    access_key_id: raw.s3_access_key_id,
                    secret_access_key: raw.s3_secret_access_key,
                    bucket_name: container_name,
                    folder_prefix: raw.s3_folder_prefix,
                })
            }
            Some(other) => {
                return Err(invalid("UPLOAD_BACKEND", other, "expected 'drive' or 's3'"));
            }
        };

        let interval_days = match raw.interval_days {
            Some(value) => match value.parse::<u32>() {
                Ok(days) if days >= 1 => days,
                _ => return Err(invalid("BACKUP_INTERVAL_DAYS", &value, "expected a whole number of days >= 1")),
            },
            None => DEFAULT_INTERVAL_DAYS,
        };

        let dev_mode = match raw.dev_mode.as_deref() {
            Some(flag) => parse_flag("DEV_MODE", flag)?,
            None => false,
        };

        let wants_weekly = match raw.schedule_mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("interval") => false,
            Some("weekly") | Some("weekday") | Some("fixed") => true,
            Some(other) => {
                return Err(invalid("SCHEDULE_MODE", other, "expected 'interval' or 'weekly'"));
            }
        };

        let schedule = if dev_mode {
            if wants_weekly {
                return Err(ConfigError::Conflict(
                    "DEV_MODE cannot be combined with SCHEDULE_MODE=weekly".to_string(),
                ));
            }
            ScheduleMode::Development {
                period: DEV_MODE_PERIOD,
            }
        } else if wants_weekly {
            let spec = raw
                .weekly_schedule
                .as_deref()
                .unwrap_or(DEFAULT_WEEKLY_SCHEDULE);
            ScheduleMode::FixedWeekdays(parse_weekly_schedule(spec)?)
        } else {
            // TEST_BACKUP_TIME wins so a test run can be pulled forward without touching BACKUP_TIME.
            let (key, value) = match (&raw.test_backup_time, &raw.backup_time) {
                (Some(test), _) => ("TEST_BACKUP_TIME", test.as_str()),
                (None, Some(time)) => ("BACKUP_TIME", time.as_str()),
                (None, None) => ("BACKUP_TIME", DEFAULT_BACKUP_TIME),
            };
            ScheduleMode::Interval {
                at: parse_time_of_day(key, value)?,
            }
        };

        Ok(AppConfig {
            backup: BackupConfig {
                source_dir,
                archive_mode,
                output_dir,
            },
            upload,
            schedule,
            interval_days,
            db_path: PathBuf::from(raw.db_file.unwrap_or_else(|| DEFAULT_DB_FILE.to_string())),
            log_file: PathBuf::from(raw.log_file.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())),
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean flag")),
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time_of_day(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| invalid(key, value, "expected a 24h time of day like 13:00"))
}

/// Parses a comma separated list such as `wed 15:45,fri 15:45`.
fn parse_weekly_schedule(spec: &str) -> Result<Vec<WeeklySlot>, ConfigError> {
    let mut slots = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split_whitespace();
        let (Some(day), Some(time), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("WEEKLY_SCHEDULE", entry, "expected '<weekday> <HH:MM>'"));
        };
        let weekday = day
            .parse::<Weekday>()
            .map_err(|_| invalid("WEEKLY_SCHEDULE", day, "unknown weekday"))?;
        slots.push(WeeklySlot {
            weekday,
            at: parse_time_of_day("WEEKLY_SCHEDULE", time)?,
        });
    }
    if slots.is_empty() {
        return Err(invalid("WEEKLY_SCHEDULE", spec, "no weekly slots configured"));
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw_from(pairs: &[(&str, &str)]) -> RawEnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RawEnvConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_missing_source_directory_is_fatal() {
        let err = AppConfig::from_raw(raw_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SOURCE_DIRECTORY")));

        let err = AppConfig::from_raw(raw_from(&[("SOURCE_DIRECTORY", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SOURCE_DIRECTORY")));
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(&[("SOURCE_DIRECTORY", "/srv/data")]))?;

        assert_eq!(config.backup.source_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.backup.archive_mode, ArchiveMode::Tree);
        assert_eq!(config.interval_days, 3);
        assert_eq!(config.db_path, PathBuf::from("backups.db"));
        assert_eq!(config.log_file, PathBuf::from("backup.log"));
        assert_eq!(
            config.schedule,
            ScheduleMode::Interval {
                at: NaiveTime::from_hms_opt(13, 0, 0).unwrap()
            }
        );
        match config.upload {
            UploadConfig::Drive(drive) => {
                assert_eq!(drive.folder_name, "backups");
                assert_eq!(drive.client_secrets_file, PathBuf::from("client_secrets.json"));
                assert_eq!(drive.credentials_file, PathBuf::from("mycreds.json"));
            }
            other => panic!("expected drive backend, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_test_backup_time_overrides_backup_time() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("BACKUP_TIME", "02:30"),
            ("TEST_BACKUP_TIME", "09:15:30"),
        ]))?;
        assert_eq!(
            config.schedule,
            ScheduleMode::Interval {
                at: NaiveTime::from_hms_opt(9, 15, 30).unwrap()
            }
        );
        Ok(())
    }

    #[test]
    fn test_weekly_defaults_to_wednesday_and_friday() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("SCHEDULE_MODE", "weekly"),
        ]))?;
        let at = NaiveTime::from_hms_opt(15, 45, 0).unwrap();
        assert_eq!(
            config.schedule,
            ScheduleMode::FixedWeekdays(vec![
                WeeklySlot { weekday: Weekday::Wed, at },
                WeeklySlot { weekday: Weekday::Fri, at },
            ])
        );
        Ok(())
    }

    #[test]
    fn test_custom_weekly_schedule() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("SCHEDULE_MODE", "weekly"),
            ("WEEKLY_SCHEDULE", "Monday 08:00, sun 22:10"),
        ]))?;
        assert_eq!(
            config.schedule,
            ScheduleMode::FixedWeekdays(vec![
                WeeklySlot {
                    weekday: Weekday::Mon,
                    at: NaiveTime::from_hms_opt(8, 0, 0).unwrap()
                },
                WeeklySlot {
                    weekday: Weekday::Sun,
                    at: NaiveTime::from_hms_opt(22, 10, 0).unwrap()
                },
            ])
        );
        Ok(())
    }

    #[test]
    fn test_dev_mode_and_weekly_conflict() {
        let err = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("SCHEDULE_MODE", "weekly"),
            ("DEV_MODE", "true"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[test]
    fn test_dev_mode_runs_every_minute() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("DEV_MODE", "1"),
        ]))?;
        assert_eq!(
            config.schedule,
            ScheduleMode::Development {
                period: Duration::from_secs(60)
            }
        );
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("BACKUP_INTERVAL_DAYS", "0"),
            ("BACKUP_INTERVAL_DAYS", "three"),
            ("ARCHIVE_MODE", "incremental"),
            ("UPLOAD_BACKEND", "ftp"),
            ("TEST_BACKUP_TIME", "25:00"),
            ("DEV_MODE", "maybe"),
        ] {
            let result = AppConfig::from_raw(raw_from(&[("SOURCE_DIRECTORY", "/srv/data"), (key, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_s3_backend_uses_container_name_as_bucket() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("UPLOAD_BACKEND", "s3"),
            ("DRIVE_FOLDER_NAME", "nightly"),
            ("S3_REGION", "eu-west-1"),
            ("ARCHIVE_MODE", "latest"),
        ]))?;
        assert_eq!(config.backup.archive_mode, ArchiveMode::LatestFile);
        match config.upload {
            UploadConfig::S3(s3) => {
                assert_eq!(s3.bucket_name, "nightly");
                assert_eq!(s3.region, "eu-west-1");
                assert!(s3.access_key_id.is_none());
            }
            other => panic!("expected s3 backend, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_s3_keys_must_come_in_pairs() {
        let err = AppConfig::from_raw(raw_from(&[
            ("SOURCE_DIRECTORY", "/srv/data"),
            ("UPLOAD_BACKEND", "s3"),
            ("S3_ACCESS_KEY_ID", "AKIA"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }
}
