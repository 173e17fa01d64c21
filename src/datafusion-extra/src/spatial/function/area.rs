use std::any::Any;

use datafusion::arrow::array::Float64Array;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::Result as DFResult;
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};
use geos::Geom;

use super::args::{geos_failure, prepare_args, read_geometry};

pub fn st_area() -> ScalarUDF {
    ScalarUDF::new_from_impl(AreaUDF {
        signature: Signature::any(1, Volatility::Immutable),
        aliases: vec!["st_area".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct AreaUDF {
    signature: Signature,
    aliases: Vec<String>,
}

impl ScalarUDFImpl for AreaUDF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_Area"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Float64)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> DFResult<ColumnarValue> {
        let args = prepare_args(self.name(), &args.args, &[DataType::Binary])?;

        let result = args
            .binary(0)?
            .iter()
            .map(|wkb| {
                read_geometry(wkb)
                    .map(|geom| geom.area().map_err(|e| geos_failure(self.name(), e)))
                    .transpose()
            })
            .collect::<DFResult<Float64Array>>()?;

        args.finish(result)
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}
