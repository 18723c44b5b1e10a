use std::str::FromStr;

use chumsky::prelude::*;

use super::perror::PError;
use super::{ctrl, ident_part, keyword};
use crate::lexer::lr::TokenKind;
use crate::parser::ast::{PrimitiveType, Ty, TyKind};

pub(crate) fn type_expr() -> impl Parser<TokenKind, Ty, Error = PError> + Clone {
    recursive(|type_expr| {
        let enum_ty = keyword("enum")
            .ignore_then(
                ident_part()
                    .separated_by(ctrl(','))
                    .at_least(1)
                    .delimited_by(ctrl('('), ctrl(')')),
            )
            .map(TyKind::Enum);

        let ref_ty = keyword("ref")
            .ignore_then(ident_part().delimited_by(ctrl('('), ctrl(')')))
            .map(TyKind::Ref);

        let list_ty = keyword("list")
            .ignore_then(type_expr.delimited_by(ctrl('<'), ctrl('>')))
            .map(|inner| TyKind::List(Box::new(inner)));

        let primitive = ident_part().try_map(|name, span| {
            PrimitiveType::from_str(&name)
                .map(TyKind::Primitive)
                .map_err(|_| PError::custom(span, format!("unknown type `{name}`")))
        });

        choice((enum_ty, ref_ty, list_ty, primitive)).map_with_span(TyKind::into_ty)
    })
    .labelled("type")
}

#[cfg(test)]
mod tests {
    use insta::assert_yaml_snapshot;

    use super::*;
    use crate::parser::test::parse_with_parser;

    #[test]
    fn test_type_expr() {
        assert_yaml_snapshot!(parse_with_parser("string", type_expr()).unwrap(), @r###"
        ---
        Primitive: string
        span: "0:0-6"
        "###);

        assert_yaml_snapshot!(parse_with_parser("list<ref(User)>", type_expr()).unwrap(), @r###"
        ---
        List:
          Ref: User
          span: "0:5-14"
        span: "0:0-15"
        "###);

        assert!(parse_with_parser("widget", type_expr()).is_err());
    }
}
