use std::any::Any;

use datafusion::arrow::array::Float64Array;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::Result as DFResult;
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};

use super::args::{geos_failure, prepare_args, read_geometry};
use crate::spatial::geos_ext::GeosExt;

pub fn st_distance() -> ScalarUDF {
    ScalarUDF::new_from_impl(DistanceUDF {
        signature: Signature::any(2, Volatility::Immutable),
        aliases: vec!["st_distance".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct DistanceUDF {
    signature: Signature,
    aliases: Vec<String>,
}

impl ScalarUDFImpl for DistanceUDF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_Distance"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Float64)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> DFResult<ColumnarValue> {
        let args = prepare_args(
            self.name(),
            &args.args,
            &[DataType::Binary, DataType::Binary],
        )?;

        // empty geometries have no distance
        let result = args
            .binary(0)?
            .iter()
            .zip(args.binary(1)?.iter())
            .map(|(wkb1, wkb2)| {
                match (read_geometry(wkb1), read_geometry(wkb2)) {
                    (Some(geom1), Some(geom2)) => {
                        geom1
                            .st_distance(&geom2)
                            .map_err(|e| geos_failure(self.name(), e))
                    }
                    _ => Ok(None),
                }
            })
            .collect::<DFResult<Float64Array>>()?;

        args.finish(result)
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}
