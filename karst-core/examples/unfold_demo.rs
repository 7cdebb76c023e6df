use karst_core::ir::builder::FuncBuilder;
use karst_core::ir::Module;
use karst_core::types::{tensor, tuple_of, unit, Type, TypeName};
use karst_core::unfold_tuples;

fn main() {
    let f32_ty = Type::Constructed(TypeName::Float(32), vec![]);
    let pair = tuple_of(vec![tensor(f32_ty.clone(), &[5, 7]), tensor(f32_ty.clone(), &[3, 5])]);

    let mut module = Module::new();

    let builder = FuncBuilder::new("consume", vec![(pair, "some_var".to_string())]);
    module.define(builder.finish(vec![]));

    let mut builder = FuncBuilder::new(
        "main",
        vec![
            (tensor(f32_ty.clone(), &[5, 7]), "a".to_string()),
            (tensor(f32_ty.clone(), &[3, 5]), "b".to_string()),
        ],
    );
    let a = builder.param(0);
    let b = builder.param(1);
    let pair_ab = builder.push_tuple("pair_ab", vec![a, b]).expect("tuple failed");
    let first = builder.push_project("first", pair_ab, 0).expect("project failed");
    let pair_fb = builder.push_tuple("pair_fb", vec![first, b]).expect("tuple failed");
    builder.push_call("_r", "consume", vec![pair_fb], unit()).expect("call failed");
    module.define(builder.finish(vec![]));

    println!("before:\n{}", module);
    let unfolded = unfold_tuples(module).expect("unfold failed");
    println!("after:\n{}", unfolded);
}
