use std::any::Any;

use datafusion::arrow::array::BinaryArray;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::cast::as_string_array;
use datafusion::common::Result as DFResult;
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};
use geos::Geometry;

use super::args::prepare_args;
use crate::spatial::geos_ext::GeosExt;

pub fn st_geomfromtext() -> ScalarUDF {
    ScalarUDF::new_from_impl(GeomFromTextUDF {
        signature: Signature::any(1, Volatility::Immutable),
        aliases: vec!["st_geomfromtext".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct GeomFromTextUDF {
    signature: Signature,
    aliases: Vec<String>,
}

impl ScalarUDFImpl for GeomFromTextUDF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_GeomFromText"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Binary)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> DFResult<ColumnarValue> {
        let args = prepare_args(self.name(), &args.args, &[DataType::Utf8])?;

        let result: BinaryArray = as_string_array(args.array(0))?
            .iter()
            .map(|opt| {
                opt.and_then(|wkt| {
                    Geometry::new_from_wkt(wkt)
                        .and_then(|geom| geom.as_wkb())
                        .ok()
                })
            })
            .collect();

        args.finish(result)
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}
