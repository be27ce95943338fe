//! Host power models configured by name.

use cloudlab_models::power::cpu::CpuPowerModel;
use cloudlab_models::power::cpu_models::constant::ConstantCpuPowerModel;
use cloudlab_models::power::cpu_models::cubic::CubicCpuPowerModel;
use cloudlab_models::power::cpu_models::linear::LinearCpuPowerModel;
use cloudlab_models::power::cpu_models::square::SquareCpuPowerModel;

use crate::core::config::{get_option, parse_config_value, parse_options};
use crate::core::error::ConfigError;

/// Creates power model from its config string, e.g. `Linear[idle=100,max=250]` or `Constant[power=150]`.
///
/// Powers are given in watts, idle power must not exceed the max power.
pub fn power_model_resolver(config_str: &str) -> Result<Box<dyn CpuPowerModel>, ConfigError> {
    let (name, options) = parse_config_value(config_str);
    let options = parse_options(&options.unwrap_or_default());
    if !matches!(name.as_str(), "Constant" | "Linear" | "Square" | "Cubic") {
        return Err(ConfigError::UnknownName {
            kind: "power model",
            name,
        });
    }
    if name == "Constant" {
        let power: f64 = get_option(&options, "power", &name)?;
        return Ok(Box::new(ConstantCpuPowerModel::new(power)));
    }

    let idle: f64 = get_option(&options, "idle", &name)?;
    let max: f64 = get_option(&options, "max", &name)?;
    if idle < 0. || idle > max {
        return Err(ConfigError::InvalidOption {
            name,
            option: "idle".to_string(),
            reason: format!("expected 0 <= idle <= max, got idle={} max={}", idle, max),
        });
    }
    match name.as_str() {
        "Linear" => Ok(Box::new(LinearCpuPowerModel::new(idle, max))),
        "Square" => Ok(Box::new(SquareCpuPowerModel::new(idle, max))),
        _ => Ok(Box::new(CubicCpuPowerModel::new(idle, max))),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn resolves_models() {
        let linear = power_model_resolver("Linear[idle=100,max=250]").unwrap();
        assert_relative_eq!(linear.get_power(0.), 100.);
        assert_relative_eq!(linear.get_power(0.5), 175.);
        assert_relative_eq!(linear.get_power(1.), 250.);

        let constant = power_model_resolver("Constant[power=42]").unwrap();
        assert_relative_eq!(constant.get_power(0.7), 42.);

        let cubic = power_model_resolver("Cubic[idle=100, max=200]").unwrap();
        assert_relative_eq!(cubic.get_power(1.), 200.);
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(
            power_model_resolver("Quartic[idle=1,max=2]"),
            Err(ConfigError::UnknownName { .. })
        ));
        assert!(matches!(
            power_model_resolver("Quartic"),
            Err(ConfigError::UnknownName { .. })
        ));
        assert!(matches!(
            power_model_resolver("Linear[idle=100]"),
            Err(ConfigError::InvalidOption { .. })
        ));
        assert!(matches!(
            power_model_resolver("Linear[idle=300,max=200]"),
            Err(ConfigError::InvalidOption { .. })
        ));
        assert!(matches!(
            power_model_resolver("Square[idle=abc,max=200]"),
            Err(ConfigError::InvalidOption { .. })
        ));
    }
}
