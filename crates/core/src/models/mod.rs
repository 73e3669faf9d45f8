//! # 数据模型
//!
//! 训练任务队列的核心数据结构：Job、Worker、训练Task以及梯度贡献。
//!
//! ## 状态流转
//!
//! ### Job
//! ```text
//! PENDING → ASSIGNED → IN_PROGRESS → COMPLETED
//!    │         │             └──────→ FAILED
//!    └─────────┴──→ CANCELLED
//! ```
//!
//! ### Worker
//! ```text
//! IDLE ⇄ BUSY → OFFLINE
//! ```
//!
//! 所有状态枚举在存储中以字符串表示，通过 [`impl_sqlx_text_enum`] 同时适配
//! SQLite 与 PostgreSQL。

use std::collections::HashMap;

/// 任意JSON键值映射，用于Job参数、结果以及Worker能力描述
pub type JsonMap = HashMap<String, serde_json::Value>;

/// 为实现了 `as_str` 与 `FromStr` 的枚举生成 sqlx 文本编解码
macro_rules! impl_sqlx_text_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(s.parse::<$ty>()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(s.parse::<$ty>()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub mod gradient;
pub mod job;
pub mod task;
pub mod tensor;
pub mod worker;

pub use gradient::*;
pub use job::*;
pub use task::*;
pub use tensor::*;
pub use worker::*;
