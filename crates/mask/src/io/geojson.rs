use std::path::Path;

use geojson::{Feature, FeatureCollection, Geometry, Value, feature::Id};
use serde_json::{Map, Number, Value as JsonValue};

use crate::{
    algorithms::ImageprocContourExtractor,
    error::Result,
    traits::ContourExtractor,
    types::{BinaryMask, ComplexShape, MaskOutline},
};

impl MaskOutline {
    /// Trace the outlines of `mask`
    pub fn from_mask(mask: &BinaryMask, label: Option<String>) -> Result<Self> {
        Self::from_mask_with(&ImageprocContourExtractor, mask, label)
    }

    pub fn from_mask_with<E: ContourExtractor>(
        extractor: &E,
        mask: &BinaryMask,
        label: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            shapes: extractor.extract_shapes(mask)?,
            image_width: mask.width(),
            image_height: mask.height(),
            label,
        })
    }

    /// One polygon feature per shape, image size as foreign members
    pub fn to_geojson(&self) -> FeatureCollection {
        let features = self
            .shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| self.feature(i, shape))
            .collect();

        let mut foreign_members = Map::new();
        foreign_members.insert("image_width".to_string(), JsonValue::from(self.image_width));
        foreign_members.insert("image_height".to_string(), JsonValue::from(self.image_height));

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign_members),
        }
    }

    pub fn to_geojson_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_geojson())?)
    }

    pub fn save_geojson<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_geojson_string()?)?;
        Ok(())
    }

    fn feature(&self, id: usize, shape: &ComplexShape) -> Feature {
        let ring = |points: &[[f64; 2]]| -> Vec<Vec<f64>> {
            let mut ring: Vec<Vec<f64>> = points.iter().map(|&[x, y]| vec![x, y]).collect();
            // GeoJSON rings are closed
            if let Some(first) = ring.first().cloned() {
                ring.push(first);
            }
            ring
        };

        let mut coordinates = vec![ring(&shape.exterior)];
        coordinates.extend(shape.holes.iter().map(|hole| ring(hole)));

        let mut properties = Map::new();
        properties.insert("id".to_string(), JsonValue::from(id));
        properties.insert("area".to_string(), float(shape.area()));
        properties.insert("has_holes".to_string(), JsonValue::Bool(shape.has_holes()));
        properties.insert("hole_count".to_string(), JsonValue::from(shape.holes.len()));
        properties.insert("perimeter".to_string(), float(shape.perimeter()));
        if let Some(label) = &self.label {
            properties.insert("label".to_string(), JsonValue::String(label.clone()));
        }

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(coordinates))),
            id: Some(Id::Number(Number::from(id))),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

fn float(value: f64) -> JsonValue {
    Number::from_f64(value).map_or(JsonValue::from(0), JsonValue::Number)
}
