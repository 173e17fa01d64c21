use std::sync::Arc;

use datafusion::arrow::array::{Array, ArrayRef, BinaryArray, Float64Array, Int64Array};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::cast::{as_binary_array, as_float64_array, as_int64_array};
use datafusion::common::{
    DataFusionError, Result as DFResult, ScalarValue, exec_datafusion_err, exec_err,
};
use datafusion::logical_expr::ColumnarValue;
use geos::Geometry;

use crate::spatial::geos_ext::wkb_to_geos;

/// Arguments of a scalar UDF broadcast to arrays of one length and cast to
/// the types the function works on.
pub(super) struct PreparedArgs {
    arrays: Vec<ArrayRef>,
    all_scalar: bool,
}

impl PreparedArgs {
    pub(super) fn array(&self, i: usize) -> &ArrayRef {
        &self.arrays[i]
    }

    pub(super) fn binary(&self, i: usize) -> DFResult<&BinaryArray> {
        as_binary_array(&self.arrays[i])
    }

    pub(super) fn float64(&self, i: usize) -> DFResult<&Float64Array> {
        as_float64_array(&self.arrays[i])
    }

    pub(super) fn int64(&self, i: usize) -> DFResult<&Int64Array> {
        as_int64_array(&self.arrays[i])
    }

    /// Wrap a result array, turning it back into a scalar when every input
    /// was a scalar.
    pub(super) fn finish<A: Array + 'static>(&self, result: A) -> DFResult<ColumnarValue> {
        let result: ArrayRef = Arc::new(result);
        if self.all_scalar {
            Ok(ColumnarValue::Scalar(ScalarValue::try_from_array(
                &result, 0,
            )?))
        } else {
            Ok(ColumnarValue::Array(result))
        }
    }
}

pub(super) fn prepare_args(
    name: &str, args: &[ColumnarValue], types: &[DataType],
) -> DFResult<PreparedArgs> {
    if args.len() != types.len() {
        return exec_err!("invalid number of arguments for udf {name}");
    }

    let all_scalar = args
        .iter()
        .all(|arg| matches!(arg, ColumnarValue::Scalar(_)));
    let mut arrays = Vec::with_capacity(args.len());
    for (array, data_type) in ColumnarValue::values_to_arrays(args)?
        .into_iter()
        .zip(types)
    {
        if array.data_type() == data_type {
            arrays.push(array);
        } else if matches!(
            (array.data_type(), data_type),
            (DataType::Null, _)
                | (DataType::LargeBinary | DataType::BinaryView, DataType::Binary)
                | (DataType::Utf8View | DataType::LargeUtf8, DataType::Utf8)
                | (
                    DataType::Int8
                        | DataType::Int16
                        | DataType::Int32
                        | DataType::UInt8
                        | DataType::UInt16
                        | DataType::UInt32,
                    DataType::Int64
                )
                | (
                    DataType::Int32 | DataType::Int64 | DataType::Float32,
                    DataType::Float64
                )
        ) {
            arrays.push(cast(&array, data_type)?);
        } else {
            return exec_err!(
                "unsupported data type '{}' for udf {name}",
                array.data_type()
            );
        }
    }

    Ok(PreparedArgs { arrays, all_scalar })
}

/// Parse a WKB value, treating undecodable input as null.
pub(super) fn read_geometry(wkb: Option<&[u8]>) -> Option<Geometry> {
    wkb.and_then(|wkb| wkb_to_geos(wkb).ok())
}

/// Error for a GEOS operation that failed on decoded input.
pub(super) fn geos_failure(name: &str, e: geos::Error) -> DataFusionError {
    exec_datafusion_err!("{name} failed: {e}")
}
