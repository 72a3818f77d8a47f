use super::*;

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            grid_sensor: "sensor.grid_power".to_string(),
            solar_sensor: None,
            battery_power_sensor: None,
            battery_soc_sensor: None,
            price_sensor: None,
            grid_rewards_entity: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            power_limit_kw: 11.0,
        }
    }
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            grid_fee_import: 0.0,
            grid_fee_export: 0.0,
            export_compensation: 0.0,
            vat_rate: 0.25,
            night_start_hour: 22,
            night_end_hour: 6,
        }
    }
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            priority: 1,
            target_soc_pct: 80,
            max_amps: 16,
            phases: Phases::Three,
            charger: ChargerBinding::default(),
            soc_entity: None,
            departure_entity: None,
            force_charge_entity: None,
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            obc_cooldown_seconds: 30,
            min_charging_amps: 6,
            safe_mode_amps: 6,
            voltage: 230.0,
            export_threshold_w: 0.0,
            phase_switch_min_gain_w: 1000.0,
            command_timeout_seconds: 5.0,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            command_refresh_seconds: 300,
        }
    }
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: "http://homeassistant.local:8123".to_string(),
            token: String::new(),
            charger_domain: "easee".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/smartev.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            limits: LimitsConfig::default(),
            economics: EconomicsConfig::default(),
            vehicles: Vec::new(),
            controls: ControlsConfig::default(),
            home_assistant: HomeAssistantConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            timezone: "Europe/Stockholm".to_string(),
            state_file: "/data/smartev_state.json".to_string(),
        }
    }
}
