/// Declares a struct together with its [`Describe`](crate::Describe) implementation.
///
/// ```
/// use kope_core::{describe, Metadata, Scope};
///
/// describe! {
///     #[resource(kind = "Widget", group = "example.com", version = "v1", scope = Scope::Cluster)]
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Widget {
///         pub metadata: Metadata,
///         #[field(minimum = 1, maximum = 100, description = "replica count")]
///         pub count: i64,
///         #[field(wire = "displayName")]
///         pub display_name: Option<String>,
///         #[field(ignore)]
///         pub scratch: Vec<String>,
///     }
/// }
/// ```
///
/// `#[resource(...)]` keys are [`IdentityBuilder`](crate::IdentityBuilder) methods and
/// `#[field(...)]` keys are [`FieldMeta`](crate::FieldMeta) methods. `#[field(ignore)]` must
/// stand alone; ignored fields are rebuilt with `Default::default()`. Fields may carry doc
/// comments around their `#[field(...)]`; other field attributes are not accepted.
#[macro_export]
macro_rules! describe {
    (
        @composite [$identity:expr]
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[doc = $pre:literal])*
                $(#[field($($attr:tt)*)] $(#[doc = $post:literal])*)?
                $fvis:vis $fname:ident : $fty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[doc = $pre])* $($(#[doc = $post])*)? $fvis $fname: $fty, )*
        }

        impl $crate::Describe for $name {
            fn type_model() -> $crate::TypeModel {
                #[allow(unused_mut)]
                let mut composite = $crate::Composite::new(stringify!($name));
                $( composite = $crate::describe!(@field composite, $fname, $fty; $($($attr)*)?); )*
                $crate::TypeModel::Composite(composite)
            }

            fn identity() -> ::core::option::Option<$crate::ResourceIdentity> {
                $identity
            }

            fn to_value(&self) -> $crate::Value {
                #[allow(unused_mut)]
                let mut fields = ::std::vec::Vec::new();
                $( $crate::describe!(@value fields, $fname, &self.$fname; $($($attr)*)?); )*
                $crate::Value::Composite(fields)
            }

            fn from_value(value: $crate::Value) -> ::core::result::Result<Self, $crate::ValueError> {
                #[allow(unused_mut, unused_variables)]
                let mut fields = $crate::FieldValues::from_value(stringify!($name), value)?;
                ::core::result::Result::Ok(Self {
                    $( $fname: $crate::describe!(@take fields, $fname; $($($attr)*)?), )*
                })
            }
        }
    };

    (@field $c:ident, $fname:ident, $fty:ty; ignore) => { $c };
    (@field $c:ident, $fname:ident, $fty:ty; $($attr:tt)*) => {
        $c.field(
            stringify!($fname),
            <$fty as $crate::Describe>::type_model(),
            $crate::describe!(@meta $crate::FieldMeta::new(); $($attr)*),
        )
    };

    (@value $fields:ident, $fname:ident, $v:expr; ignore) => {};
    (@value $fields:ident, $fname:ident, $v:expr; $($attr:tt)*) => {
        $fields.push((stringify!($fname), $crate::Describe::to_value($v)));
    };

    (@take $fields:ident, $fname:ident; ignore) => { ::core::default::Default::default() };
    (@take $fields:ident, $fname:ident; $($attr:tt)*) => { $fields.take(stringify!($fname))? };

    (@meta $m:expr;) => { $m };
    (@meta $m:expr; $key:ident = $val:expr $(, $($rest:tt)*)?) => {
        $crate::describe!(@meta $m.$key($val); $($($rest)*)?)
    };

    ($(#[doc = $doc:literal])+ #[resource($($key:ident = $val:expr),* $(,)?)] $($rest:tt)*) => {
        $crate::describe!(#[resource($($key = $val),*)] $(#[doc = $doc])+ $($rest)*);
    };

    (#[resource($($key:ident = $val:expr),* $(,)?)] $($rest:tt)*) => {
        $crate::describe!(
            @composite [::core::option::Option::Some($crate::ResourceIdentity::builder()$(.$key($val))*.build())]
            $($rest)*
        );
    };

    ($($rest:tt)*) => {
        $crate::describe!(@composite [::core::option::Option::None] $($rest)*);
    };
}
