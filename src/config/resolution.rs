use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// Output frame size, written as `WIDTHxHEIGHT` (e.g. `832x480`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::new(832, 480)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid resolution '{s}', expected WIDTHxHEIGHT"))?;
        let width = width
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid resolution width in '{s}'"))?;
        let height = height
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid resolution height in '{s}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("Resolution '{s}' must have a non-zero width and height"));
        }
        Ok(Resolution::new(width, height))
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(ResolutionVisitor)
    }
}

struct ResolutionVisitor;

impl<'de> de::Visitor<'de> for ResolutionVisitor {
    type Value = Resolution;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string such as '832x480'")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.parse().map_err(E::custom)
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_width_by_height() {
        let res: Resolution = "1280x720".parse().unwrap();
        assert_eq!(res.width(), 1280);
        assert_eq!(res.height(), 720);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!("1280".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert!("widexhigh".parse::<Resolution>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let res: Resolution = serde_json::from_str("\"832x480\"").unwrap();
        assert_eq!(res, Resolution::default());
        assert_eq!(serde_json::to_string(&res).unwrap(), "\"832x480\"");
        assert!(serde_json::from_str::<Resolution>("832").is_err());
    }
}
