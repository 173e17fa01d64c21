use std::any::Any;

use datafusion::arrow::array::{Array, BinaryArray};
use datafusion::arrow::datatypes::DataType;
use datafusion::common::{Result as DFResult, exec_err};
use datafusion::logical_expr::{
    ColumnarValue, ScalarFunctionArgs, ScalarUDF, ScalarUDFImpl, Signature, Volatility,
};

use super::args::prepare_args;
use crate::spatial::geos_ext::{ExtractDimension, GeosExt, collection_extract};

/// `ST_CollectionExtract(geom, type)`: the parts of `geom` with the given
/// dimension (1 point, 2 line, 3 polygon) as a multi geometry.
pub fn st_collection_extract() -> ScalarUDF {
    ScalarUDF::new_from_impl(CollectionExtractUDF {
        signature: Signature::any(2, Volatility::Immutable),
        aliases: vec!["st_collectionextract".to_owned()],
    })
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct CollectionExtractUDF {
    signature: Signature,
    aliases: Vec<String>,
}

impl ScalarUDFImpl for CollectionExtractUDF {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        "ST_CollectionExtract"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, _arg_types: &[DataType]) -> DFResult<DataType> {
        Ok(DataType::Binary)
    }

    fn invoke_with_args(&self, args: ScalarFunctionArgs) -> DFResult<ColumnarValue> {
        let args = prepare_args(
            self.name(),
            &args.args,
            &[DataType::Binary, DataType::Int64],
        )?;

        let mut result = Vec::with_capacity(args.binary(0)?.len());
        for (wkb, code) in args.binary(0)?.iter().zip(args.int64(1)?.iter()) {
            let (Some(wkb), Some(code)) = (wkb, code) else {
                result.push(None);
                continue;
            };
            let Some(dimension) = ExtractDimension::try_from_code(code) else {
                return exec_err!("invalid geometry type {code} for udf {}", self.name());
            };
            result.push(
                collection_extract(wkb, dimension)
                    .and_then(|geom| geom.as_wkb())
                    .ok(),
            );
        }

        args.finish(BinaryArray::from_iter(result))
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }
}
