use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use rowpipe_error::{ErrorKind, RowpipeError, Result};

use super::PipelineConfig;

pub(super) struct SettingFunctions {
    pub(super) set: fn(value: &str, conf: &mut PipelineConfig) -> Result<()>,
    pub(super) get: fn(conf: &PipelineConfig) -> String,
}

impl SettingFunctions {
    const fn new<S: PipelineSetting>() -> Self {
        SettingFunctions {
            set: S::set_from_str as _,
            get: S::get_as_string as _,
        }
    }
}

fn insert_setting<S: PipelineSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<ChannelCapacity>(&mut map);
    insert_setting::<BatchQuantum>(&mut map);
    insert_setting::<SafeMode>(&mut map);
    insert_setting::<ThreadPriorityManagement>(&mut map);
    insert_setting::<PushTimeoutMs>(&mut map);
    insert_setting::<PopTimeoutMs>(&mut map);
    insert_setting::<PausePollMs>(&mut map);
    insert_setting::<RemoteConnectTimeoutMs>(&mut map);
    insert_setting::<RemoteAcceptTimeoutMs>(&mut map);
    insert_setting::<SlaveName>(&mut map);

    map
});

pub(super) fn lookup(name: &str) -> Result<&'static SettingFunctions> {
    GET_SET_FUNCTIONS.get(name).ok_or_else(|| {
        RowpipeError::new(format!("Missing setting for '{name}'"))
            .with_kind(ErrorKind::InvalidConfig)
    })
}

pub(super) fn exists(name: &str) -> bool {
    GET_SET_FUNCTIONS.contains_key(name)
}

/// A named pipeline setting that can be set from and rendered to a string.
pub trait PipelineSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()>;
    fn get_as_string(conf: &PipelineConfig) -> String;
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        RowpipeError::new(format!("Invalid value for setting '{name}'"))
            .with_kind(ErrorKind::InvalidConfig)
            .with_field("value", value)
    })
}

pub struct ChannelCapacity;

impl PipelineSetting for ChannelCapacity {
    const NAME: &'static str = "channel_capacity";
    const DESCRIPTION: &'static str = "Maximum number of rows buffered per row channel";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.channel_capacity = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.channel_capacity.to_string()
    }
}

pub struct BatchQuantum;

impl PipelineSetting for BatchQuantum {
    const NAME: &'static str = "batch_quantum";
    const DESCRIPTION: &'static str = "Rows read from one input before peeking at the others";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.batch_quantum = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.batch_quantum.to_string()
    }
}

pub struct SafeMode;

impl PipelineSetting for SafeMode {
    const NAME: &'static str = "safe_mode";
    const DESCRIPTION: &'static str = "Check the layout of every row read against the first row";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.safe_mode = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.safe_mode.to_string()
    }
}

pub struct ThreadPriorityManagement;

impl PipelineSetting for ThreadPriorityManagement {
    const NAME: &'static str = "thread_priority_management";
    const DESCRIPTION: &'static str = "Yield on nearly full outputs and nearly empty inputs";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.thread_priority_management = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.thread_priority_management.to_string()
    }
}

pub struct PushTimeoutMs;

impl PipelineSetting for PushTimeoutMs {
    const NAME: &'static str = "push_timeout_ms";
    const DESCRIPTION: &'static str = "Bound in milliseconds on a single blocking push";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.push_timeout_ms = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.push_timeout_ms.to_string()
    }
}

pub struct PopTimeoutMs;

impl PipelineSetting for PopTimeoutMs {
    const NAME: &'static str = "pop_timeout_ms";
    const DESCRIPTION: &'static str = "Bound in milliseconds on a single blocking pop";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.pop_timeout_ms = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.pop_timeout_ms.to_string()
    }
}

pub struct PausePollMs;

impl PipelineSetting for PausePollMs {
    const NAME: &'static str = "pause_poll_ms";
    const DESCRIPTION: &'static str = "Sleep interval in milliseconds while paused";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.pause_poll_ms = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.pause_poll_ms.to_string()
    }
}

pub struct RemoteConnectTimeoutMs;

impl PipelineSetting for RemoteConnectTimeoutMs {
    const NAME: &'static str = "remote_connect_timeout_ms";
    const DESCRIPTION: &'static str = "How long a remote input retries connecting";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.remote_connect_timeout_ms = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.remote_connect_timeout_ms.to_string()
    }
}

pub struct RemoteAcceptTimeoutMs;

impl PipelineSetting for RemoteAcceptTimeoutMs {
    const NAME: &'static str = "remote_accept_timeout_ms";
    const DESCRIPTION: &'static str = "How long a remote output waits for its peer";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        conf.remote_accept_timeout_ms = parse(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.remote_accept_timeout_ms.to_string()
    }
}

pub struct SlaveName;

impl PipelineSetting for SlaveName {
    const NAME: &'static str = "slave_name";
    const DESCRIPTION: &'static str = "Name of this host in a clustered run";

    fn set_from_str(value: &str, conf: &mut PipelineConfig) -> Result<()> {
        let value = value.trim();
        conf.slave_name = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        Ok(())
    }

    fn get_as_string(conf: &PipelineConfig) -> String {
        conf.slave_name.clone().unwrap_or_default()
    }
}
