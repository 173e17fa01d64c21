use std::any::Any;

use datafusion::arrow::array::BooleanArray;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::Result as DFResult;
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};

use super::args::{geos_failure, prepare_args, read_geometry};
use crate::spatial::geos_ext::GeosExt;

pub fn st_intersects() -> ScalarUDF {
    ScalarUDF::new_from_impl(IntersectsUDF {
        signature: Signature::any(2, Volatility::Immutable),
        aliases: vec!["st_intersects".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct IntersectsUDF {
    signature: Signature,
    aliases: Vec<String>,
}

impl ScalarUDFImpl for IntersectsUDF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_Intersects"
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
            &[DataType::Binary, DataType::Binary],
        )?;

        let result = args
            .binary(0)?
            .iter()
            .zip(args.binary(1)?.iter())
            .map(|(wkb1, wkb2)| {
                match (read_geometry(wkb1), read_geometry(wkb2)) {
                    (Some(geom1), Some(geom2)) => {
                        geom1
                            .st_intersects(&geom2)
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
