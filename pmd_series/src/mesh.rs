//! Fields defined on a grid.

use crate::record::BaseRecord;
use crate::{
    invalid_operation, Attributable, AttributableData, ContainerElement, RecordComponent, Result,
};
use pmd_io::FlushParams;
use pmd_types::{Attribute, UnitDimension};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Coordinate system of a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geometry {
    Cartesian,
    ThetaMode,
    Cylindrical,
    Spherical,
    /// Free-form geometry, optionally parameterized.
    Other(Option<String>),
}

impl Display for Geometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            Self::Cartesian => "cartesian",
            Self::ThetaMode => "thetaMode",
            Self::Cylindrical => "cylindrical",
            Self::Spherical => "spherical",
            Self::Other(_) => "other",
        };
        f.write_str(repr)
    }
}

impl FromStr for Geometry {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cartesian" => Ok(Self::Cartesian),
            "thetaMode" => Ok(Self::ThetaMode),
            "cylindrical" => Ok(Self::Cylindrical),
            "spherical" => Ok(Self::Spherical),
            "other" => Ok(Self::Other(None)),
            other => Err(invalid_operation(format!("unknown geometry \"{other}\""))),
        }
    }
}

/// Memory layout of the grid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrder {
    C,
    F,
}

impl DataOrder {
    fn as_char(&self) -> i8 {
        match self {
            Self::C => b'C' as i8,
            Self::F => b'F' as i8,
        }
    }

    fn from_char(c: i8) -> Result<Self> {
        match c as u8 {
            b'C' => Ok(Self::C),
            b'F' => Ok(Self::F),
            other => Err(invalid_operation(format!(
                "unknown data order '{}'",
                other as char
            ))),
        }
    }
}

/// A record representing a field on a grid, with the grid's geometry
/// attached as attributes.
#[derive(Debug, Clone)]
pub struct Mesh {
    base: BaseRecord,
}

impl Attributable for Mesh {
    fn node(&self) -> &AttributableData {
        self.base.data()
    }
}

impl ContainerElement for Mesh {
    fn new_child(parent: &AttributableData, key: &str) -> Self {
        let mesh = Self {
            base: BaseRecord::wired(AttributableData::child_of(parent, key)),
        };
        let node = mesh.node();
        node.set_attribute_raw("geometry", Attribute::from("cartesian"));
        node.set_attribute_raw("dataOrder", Attribute::Char(DataOrder::C.as_char()));
        node.set_attribute_raw("gridSpacing", Attribute::VecDouble(vec![1.0]));
        node.set_attribute_raw("gridGlobalOffset", Attribute::VecDouble(vec![0.0]));
        node.set_attribute_raw("gridUnitSI", Attribute::Double(1.0));
        node.set_attribute_raw("unitDimension", Attribute::ArrDbl7([0.0; 7]));
        node.set_attribute_raw("timeOffset", Attribute::Double(0.0));
        mesh
    }

    fn element_node(&self) -> &AttributableData {
        self.base.data()
    }
}

impl Mesh {
    /// The component for one axis, auto-created.
    pub fn component(&self, key: &str) -> Result<RecordComponent> {
        self.base.component(key)
    }

    /// The single component of a scalar mesh.
    pub fn scalar_component(&self) -> Result<RecordComponent> {
        self.base.component(crate::SCALAR)
    }

    pub fn scalar(&self) -> bool {
        self.base.scalar()
    }

    pub fn component_keys(&self) -> Vec<String> {
        self.base.components().keys()
    }

    pub(crate) fn all_components(&self) -> Vec<(String, RecordComponent)> {
        self.base.components().iter()
    }

    pub fn geometry(&self) -> Geometry {
        let base = self
            .get_attribute("geometry")
            .and_then(|a| a.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(Geometry::Cartesian);
        match base {
            Geometry::Other(_) => Geometry::Other(
                self.get_attribute("geometryParameters")
                    .and_then(|a| a.as_str().map(str::to_owned)),
            ),
            other => other,
        }
    }

    pub fn set_geometry(&self, geometry: Geometry) -> &Self {
        self.node()
            .set_attribute_raw("geometry", Attribute::from(geometry.to_string()));
        if let Geometry::Other(Some(parameters)) = &geometry {
            self.node()
                .set_attribute_raw("geometryParameters", Attribute::from(parameters.as_str()));
        }
        self
    }

    pub fn data_order(&self) -> DataOrder {
        self.get_attribute("dataOrder")
            .and_then(|a| match a {
                Attribute::Char(c) => DataOrder::from_char(c).ok(),
                Attribute::String(s) if s == "C" => Some(DataOrder::C),
                Attribute::String(s) if s == "F" => Some(DataOrder::F),
                _ => None,
            })
            .unwrap_or(DataOrder::C)
    }

    pub fn set_data_order(&self, data_order: DataOrder) -> &Self {
        self.node()
            .set_attribute_raw("dataOrder", Attribute::Char(data_order.as_char()));
        self
    }

    pub fn axis_labels(&self) -> Option<Vec<String>> {
        self.get_attribute("axisLabels").and_then(|a| a.as_vec_string())
    }

    pub fn set_axis_labels(&self, labels: Vec<String>) -> &Self {
        self.node()
            .set_attribute_raw("axisLabels", Attribute::VecString(labels));
        self
    }

    pub fn grid_spacing(&self) -> Vec<f64> {
        self.get_attribute("gridSpacing")
            .and_then(|a| a.as_vec_f64())
            .unwrap_or_else(|| vec![1.0])
    }

    pub fn set_grid_spacing(&self, spacing: Vec<f64>) -> &Self {
        self.node()
            .set_attribute_raw("gridSpacing", Attribute::VecDouble(spacing));
        self
    }

    pub fn grid_global_offset(&self) -> Vec<f64> {
        self.get_attribute("gridGlobalOffset")
            .and_then(|a| a.as_vec_f64())
            .unwrap_or_else(|| vec![0.0])
    }

    pub fn set_grid_global_offset(&self, offset: Vec<f64>) -> &Self {
        self.node()
            .set_attribute_raw("gridGlobalOffset", Attribute::VecDouble(offset));
        self
    }

    pub fn grid_unit_si(&self) -> f64 {
        self.get_attribute("gridUnitSI")
            .and_then(|a| a.as_f64())
            .unwrap_or(1.0)
    }

    pub fn set_grid_unit_si(&self, unit: f64) -> &Self {
        self.node()
            .set_attribute_raw("gridUnitSI", Attribute::Double(unit));
        self
    }

    pub fn unit_dimension(&self) -> UnitDimension {
        self.node()
            .get_attribute_raw("unitDimension")
            .and_then(|a| a.as_unit_dimension())
            .unwrap_or([0.0; 7])
    }

    pub fn set_unit_dimension(&self, unit_dimension: UnitDimension) -> &Self {
        self.node()
            .set_attribute_raw("unitDimension", Attribute::ArrDbl7(unit_dimension));
        self
    }

    pub fn time_offset(&self) -> f64 {
        self.node()
            .get_attribute_raw("timeOffset")
            .and_then(|a| a.as_f64())
            .unwrap_or(0.0)
    }

    pub fn set_time_offset(&self, time_offset: f64) -> &Self {
        self.node()
            .set_attribute_raw("timeOffset", Attribute::Double(time_offset));
        self
    }

    /// Per-axis in-cell position of the values, written on the components.
    pub fn set_position(&self, position: Vec<f64>) -> Result<&Self> {
        for (_, component) in self.base.components().iter() {
            component
                .node()
                .set_attribute_raw("position", Attribute::VecDouble(position.clone()));
        }
        Ok(self)
    }

    pub(crate) fn flush(&self, name: &str, params: &FlushParams) -> Result<()> {
        if let Some(labels) = self.axis_labels() {
            let ranks: Vec<usize> = self
                .base
                .components()
                .iter()
                .into_iter()
                .map(|(_, c)| c.rank())
                .collect();
            if let Some(rank) = ranks.first() {
                if *rank != 0 && labels.len() != *rank {
                    return Err(invalid_operation(format!(
                        "mesh \"{name}\" has {} axis labels for rank-{rank} components",
                        labels.len()
                    )));
                }
            }
        }
        self.base.flush(
            name,
            params,
            &[
                "geometry",
                "dataOrder",
                "axisLabels",
                "gridSpacing",
                "gridGlobalOffset",
                "gridUnitSI",
                "unitDimension",
                "timeOffset",
            ],
        )
    }

    pub(crate) fn parse(&self, name: &str, is_group: bool) -> Result<()> {
        self.base.parse(name, is_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pmd_io::{DummyIoHandler, SharedIoHandler};
    use pmd_types::{Access, Dataset, Datatype};
    use std::sync::Arc;

    fn mesh() -> Mesh {
        let handler: SharedIoHandler = Arc::new(Mutex::new(DummyIoHandler::new(
            ".".to_owned(),
            Access::Create,
        )));
        let root = AttributableData::new(handler);
        Mesh::new_child(&root, "E")
    }

    #[test]
    fn defaults_follow_the_schema() {
        let m = mesh();
        assert_eq!(m.geometry(), Geometry::Cartesian);
        assert_eq!(m.data_order(), DataOrder::C);
        assert_eq!(m.grid_spacing(), vec![1.0]);
        assert_eq!(m.grid_unit_si(), 1.0);
        assert_eq!(m.unit_dimension(), [0.0; 7]);
    }

    #[test]
    fn geometry_round_trip_including_parameters() {
        let m = mesh();
        m.set_geometry(Geometry::ThetaMode);
        assert_eq!(m.geometry(), Geometry::ThetaMode);

        m.set_geometry(Geometry::Other(Some("bent".to_owned())));
        assert_eq!(m.geometry(), Geometry::Other(Some("bent".to_owned())));
        assert_eq!(
            m.get_attribute("geometry").unwrap().as_str(),
            Some("other")
        );
    }

    #[test]
    fn axis_label_cardinality_is_checked_at_flush() {
        let m = mesh();
        m.component("x")
            .unwrap()
            .reset_dataset(Dataset::new(Datatype::Double, vec![4, 4]))
            .unwrap();
        m.set_axis_labels(vec!["x".to_owned()]);
        let err = m.flush("E", &FlushParams::default()).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation { .. }));

        m.set_axis_labels(vec!["x".to_owned(), "y".to_owned()]);
        m.flush("E", &FlushParams::default()).unwrap();
    }
}
