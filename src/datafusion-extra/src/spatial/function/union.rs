use std::any::Any;

use datafusion::arrow::array::ArrayRef;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::cast::as_binary_array;
use datafusion::common::{Result as DFResult, ScalarValue, exec_datafusion_err, exec_err};
use datafusion::logical_expr::function::AccumulatorArgs;
use datafusion::logical_expr::{Accumulator, AggregateUDF, AggregateUDFImpl, Signature, Volatility};
use geos::{Geom, Geometry};

use crate::spatial::geos_ext::{GeosExt, wkb_to_geos};

/// `ST_Union(geom)` aggregate: the point set union of every non-null input.
/// Returns null when the group has no geometries.
pub fn st_union() -> AggregateUDF {
    AggregateUDF::new_from_impl(UnionUDAF {
        signature: Signature::exact(vec![DataType::Binary], Volatility::Immutable),
        aliases: vec!["st_union".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct UnionUDAF {
    signature: Signature,
    aliases: Vec<String>,
}

impl AggregateUDFImpl for UnionUDAF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_Union"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Binary)
    }

    fn accumulator(&self, _acc_args: AccumulatorArgs) -> DFResult<Box<dyn Accumulator>> {
        Ok(Box::<UnionAccumulator>::default())
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

#[derive(Debug, Default)]
struct UnionAccumulator {
    parts: Vec<Vec<u8>>,
}

impl UnionAccumulator {
    fn push_all(&mut self, values: &[ArrayRef]) -> DFResult<()> {
        let Some(values) = values.first() else {
            return exec_err!("no input arrays provided to ST_Union");
        };
        for wkb in as_binary_array(values)?.iter().flatten() {
            self.parts.push(wkb.to_vec());
        }
        Ok(())
    }

    fn union(&self) -> DFResult<Option<Vec<u8>>> {
        if self.parts.is_empty() {
            return Ok(None);
        }

        let geoms = self
            .parts
            .iter()
            .map(|wkb| wkb_to_geos(wkb))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| exec_datafusion_err!("invalid geometry in ST_Union: {e}"))?;
        let union = Geometry::create_geometry_collection(geoms)
            .and_then(|collection| collection.unary_union())
            .and_then(|geom| geom.as_wkb())
            .map_err(|e| exec_datafusion_err!("ST_Union failed: {e}"))?;

        Ok(Some(union))
    }
}

impl Accumulator for UnionAccumulator {
    fn update_batch(&mut self, values: &[ArrayRef]) -> DFResult<()> {
        self.push_all(values)
    }

    fn evaluate(&mut self) -> DFResult<ScalarValue> {
        Ok(ScalarValue::Binary(self.union()?))
    }

    fn size(&self) -> usize {
        size_of_val(self) + self.parts.iter().map(Vec::capacity).sum::<usize>()
    }

    fn state(&mut self) -> DFResult<Vec<ScalarValue>> {
        // partial groups are collapsed before they are shipped
        let union = self.union()?;
        self.parts = union.iter().cloned().collect();
        Ok(vec![ScalarValue::Binary(union)])
    }

    fn merge_batch(&mut self, states: &[ArrayRef]) -> DFResult<()> {
        self.push_all(states)
    }
}
