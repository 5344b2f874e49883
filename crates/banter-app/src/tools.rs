//! Built-in tools Banter registers on every chat.

use std::sync::Arc;

use banter_engine::{ToolError, ToolRegistry, ToolSpec};

/// Register the built-in tool set: local time and current weather.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec::new(
            "get_current_time",
            "Get the current date and time in the user's local timezone.",
            serde_json::json!({}),
            &[],
        ),
        Arc::new(|_args: serde_json::Value| async move { Ok(current_time()) }),
    );

    registry.register(
        ToolSpec::new(
            "get_weather",
            "Get current weather conditions for a city.",
            serde_json::json!({
                "city": {
                    "type": "string",
                    "description": "City name, e.g. 'Lisbon'"
                }
            }),
            &["city"],
        ),
        Arc::new(|args: serde_json::Value| async move {
            let Some(city) = args["city"].as_str() else {
                return Err(ToolError::InvalidArgs("city is required".to_string()));
            };
            fetch_weather(city).await
        }),
    );
}

fn current_time() -> serde_json::Value {
    let now = chrono::Local::now();
    serde_json::json!({
        "iso": now.to_rfc3339(),
        "local": now.format("%A, %B %e %Y, %H:%M").to_string(),
    })
}

/// Look a city up on the Open-Meteo geocoder, then fetch its current
/// conditions.
async fn fetch_weather(city: &str) -> Result<serde_json::Value, ToolError> {
    let client = reqwest::Client::new();

    let geo: serde_json::Value = client
        .get("https://geocoding-api.open-meteo.com/v1/search")
        .query(&[("name", city), ("count", "1")])
        .send()
        .await
        .map_err(|e| ToolError::Failed(format!("geocoding request failed: {e}")))?
        .json()
        .await
        .map_err(|e| ToolError::Failed(format!("geocoding response unreadable: {e}")))?;

    let place = &geo["results"][0];
    if place.is_null() {
        return Err(ToolError::Failed(format!("unknown city: {city}")));
    }
    let latitude = place["latitude"].as_f64().unwrap_or_default();
    let longitude = place["longitude"].as_f64().unwrap_or_default();

    let forecast: serde_json::Value = client
        .get("https://api.open-meteo.com/v1/forecast")
        .query(&[
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            (
                "current",
                "temperature_2m,apparent_temperature,weather_code,wind_speed_10m".to_string(),
            ),
        ])
        .send()
        .await
        .map_err(|e| ToolError::Failed(format!("forecast request failed: {e}")))?
        .json()
        .await
        .map_err(|e| ToolError::Failed(format!("forecast response unreadable: {e}")))?;

    let current = &forecast["current"];
    Ok(serde_json::json!({
        "city": place["name"],
        "country": place["country"],
        "temperature_c": current["temperature_2m"],
        "feels_like_c": current["apparent_temperature"],
        "wind_kmh": current["wind_speed_10m"],
        "conditions": describe_weather_code(current["weather_code"].as_u64()),
    }))
}

/// Human label for a WMO weather code.
fn describe_weather_code(code: Option<u64>) -> &'static str {
    match code {
        Some(0) => "clear sky",
        Some(1..=3) => "partly cloudy",
        Some(45) | Some(48) => "fog",
        Some(51..=57) => "drizzle",
        Some(61..=67) => "rain",
        Some(71..=77) => "snow",
        Some(80..=82) => "rain showers",
        Some(85) | Some(86) => "snow showers",
        Some(95..=99) => "thunderstorm",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_both_tools() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        let names: Vec<String> = registry
            .declarations()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(names, vec!["get_current_time", "get_weather"]);
    }

    #[test]
    fn weather_spec_requires_city() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        let specs = registry.declarations();
        let weather = specs.iter().find(|s| s.name == "get_weather").unwrap();
        assert_eq!(weather.required, vec!["city"]);
        assert_eq!(weather.parameters["city"]["type"], "string");
    }

    #[test]
    fn current_time_carries_iso_and_local_forms() {
        let value = current_time();
        assert!(value["iso"].as_str().unwrap().contains('T'));
        assert!(!value["local"].as_str().unwrap().is_empty());
    }

    #[test]
    fn weather_codes_map_to_labels() {
        assert_eq!(describe_weather_code(Some(0)), "clear sky");
        assert_eq!(describe_weather_code(Some(63)), "rain");
        assert_eq!(describe_weather_code(Some(96)), "thunderstorm");
        assert_eq!(describe_weather_code(None), "unknown");
    }
}
