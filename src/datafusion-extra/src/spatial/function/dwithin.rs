use std::any::Any;

use datafusion::arrow::array::BooleanArray;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::Result as DFResult;
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};

use super::args::{geos_failure, prepare_args, read_geometry};
use crate::spatial::geos_ext::GeosExt;

/// `ST_DWithin(a, b, distance)`: true when the planar distance between `a`
/// and `b` is at most `distance`. Distance 0 degrades to an intersects test.
pub fn st_dwithin() -> ScalarUDF {
    ScalarUDF::new_from_impl(DWithinUDF {
        signature: Signature::any(3, Volatility::Immutable),
        aliases: vec!["st_dwithin".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct DWithinUDF {
    signature: Signature,
    aliases: Vec<String>,
}

impl ScalarUDFImpl for DWithinUDF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_DWithin"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Boolean)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> DFResult<ColumnarValue> {
        let args = prepare_args(
            self.name(),
            &args.args,
            &[DataType::Binary, DataType::Binary, DataType::Float64],
        )?;

        let result = args
            .binary(0)?
            .iter()
            .zip(args.binary(1)?.iter())
            .zip(args.float64(2)?.iter())
            .map(|((wkb1, wkb2), distance)| {
                match (read_geometry(wkb1), read_geometry(wkb2), distance) {
                    (Some(geom1), Some(geom2), Some(distance)) if distance >= 0.0 => {
                        geom1
                            .st_dwithin(&geom2, distance)
                            .map(Some)
                            .map_err(|e| geos_failure(self.name(), e))
                    }
                    _ => Ok(None),
                }
            })
            .collect::<DFResult<BooleanArray>>()?;

        args.finish(result)
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}
