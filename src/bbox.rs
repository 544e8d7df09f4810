/*
 * This file is part of chunkedgraph-core.
 *
 * chunkedgraph-core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
*/

//! Bounding boxes in chunk-coordinate space, and the dataset-unit wire
//! encoding from spec.md §6: `"x0-x1_y0-y1_z0-z1"`, inclusive lower bound,
//! exclusive upper bound.

use crate::{
    error::{Error, ErrorKind},
    ids::ChunkCoord,
};

/// Default split-preview margin, in dataset units (spec.md §4.5).
pub const SPLIT_PREVIEW_MARGIN: (u32, u32, u32) = (240, 240, 24);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x0: u32,
    pub x1: u32,
    pub y0: u32,
    pub y1: u32,
    pub z0: u32,
    pub z1: u32,
}

impl BBox {
    pub const fn new(x0: u32, x1: u32, y0: u32, y1: u32, z0: u32, z1: u32) -> Self {
        Self { x0, x1, y0, y1, z0, z1 }
    }

    /// A box centered on `center`, expanded by `margin` on each axis.
    pub fn around(center: ChunkCoord, margin: (u32, u32, u32)) -> Self {
        let cx = center.x as u32;
        let cy = center.y as u32;
        let cz = center.z as u32;
        Self {
            x0: cx.saturating_sub(margin.0),
            x1: cx + margin.0,
            y0: cy.saturating_sub(margin.1),
            y1: cy + margin.1,
            z0: cz.saturating_sub(margin.2),
            z1: cz + margin.2,
        }
    }

    /// Grow this box outward by `margin` on each axis (the "safety margin"
    /// of spec.md §4.4).
    pub fn expand(&self, margin: (u32, u32, u32)) -> Self {
        Self {
            x0: self.x0.saturating_sub(margin.0),
            x1: self.x1 + margin.0,
            y0: self.y0.saturating_sub(margin.1),
            y1: self.y1 + margin.1,
            z0: self.z0.saturating_sub(margin.2),
            z1: self.z1 + margin.2,
        }
    }

    /// Inclusive-lower, exclusive-upper containment test against a chunk
    /// coordinate.
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        let (x, y, z) = (coord.x as u32, coord.y as u32, coord.z as u32);
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1 && z >= self.z0 && z < self.z1
    }

    /// Parse the `"x0-x1_y0-y1_z0-z1"` wire encoding.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() != 3 {
            return Err(Error::bad_request(format!("malformed bbox `{s}`")));
        }
        let mut axes = [0u32; 6];
        for (i, part) in parts.iter().enumerate() {
            let bounds: Vec<&str> = part.split('-').collect();
            if bounds.len() != 2 {
                return Err(Error::bad_request(format!("malformed bbox axis `{part}`")));
            }
            let lo: u32 = bounds[0]
                .parse()
                .map_err(|_| Error::bad_request(format!("malformed bbox bound `{}`", bounds[0])))?;
            let hi: u32 = bounds[1]
                .parse()
                .map_err(|_| Error::bad_request(format!("malformed bbox bound `{}`", bounds[1])))?;
            if hi < lo {
                return Err(Error::new(ErrorKind::BadRequest(format!(
                    "bbox axis `{part}` has upper bound below lower bound"
                ))));
            }
            axes[i * 2] = lo;
            axes[i * 2 + 1] = hi;
        }
        Ok(Self {
            x0: axes[0],
            x1: axes[1],
            y0: axes[2],
            y1: axes[3],
            z0: axes[4],
            z1: axes[5],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_typical_encoding() {
        let bbox = BBox::parse("0-10_5-15_0-2").unwrap();
        assert_eq!(bbox, BBox::new(0, 10, 5, 15, 0, 2));
    }

    #[test]
    fn contains_is_inclusive_lower_exclusive_upper() {
        let bbox = BBox::new(0, 10, 0, 10, 0, 10);
        assert!(bbox.contains(ChunkCoord::new(0, 0, 0)));
        assert!(!bbox.contains(ChunkCoord::new(10, 0, 0)));
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(BBox::parse("0-10_5-15").is_err());
        assert!(BBox::parse("0-10_5-15_bad-2").is_err());
    }
}
